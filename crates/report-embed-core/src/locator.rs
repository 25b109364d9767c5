use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::LocatorRules;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LocatorReport {
    #[must_use]
    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

/// Static shape checks for a signed embed locator. Every check runs; the
/// report lists all violations rather than the first one.
#[derive(Debug, Clone, Default)]
pub struct LocatorValidator {
    rules: LocatorRules,
}

impl LocatorValidator {
    #[must_use]
    pub fn new(rules: LocatorRules) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn validate(&self, locator: &str, expected_report_id: &str) -> LocatorReport {
        let mut report = LocatorReport::default();
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            report.error("locator is empty".to_string());
            return report.finish();
        }

        let url = match Url::parse(trimmed) {
            Ok(url) => url,
            Err(error) => {
                report.error(format!("locator is not a valid url: {error}"));
                return report.finish();
            }
        };

        self.check_scheme(&url, &mut report);
        self.check_host(&url, &mut report);
        self.check_path(&url, &mut report);
        self.check_report_param(&url, expected_report_id, &mut report);
        self.check_group_param(&url, &mut report);
        report.finish()
    }

    fn check_scheme(&self, url: &Url, report: &mut LocatorReport) {
        let required = self.rules.required_scheme.trim();
        if !url.scheme().eq_ignore_ascii_case(required) {
            report.error(format!(
                "locator scheme must be {required} (found {})",
                url.scheme()
            ));
        }
    }

    fn check_host(&self, url: &Url, report: &mut LocatorReport) {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            report.error("locator has no host".to_string());
            return;
        };
        let suffix = self.rules.required_host_suffix.trim().to_ascii_lowercase();
        let accepted = host == suffix || host.ends_with(&format!(".{suffix}"));
        if !accepted {
            report.error(format!(
                "locator host {host} is not an embedding service host (*.{suffix})"
            ));
            return;
        }

        let canonical = self.rules.canonical_host.trim().to_ascii_lowercase();
        if !canonical.is_empty() && host != canonical {
            report.warning(format!(
                "locator host {host} differs from the canonical host {canonical}"
            ));
        }
    }

    fn check_path(&self, url: &Url, report: &mut LocatorReport) {
        let marker = self.rules.embed_path_marker.trim();
        if !url
            .path()
            .to_ascii_lowercase()
            .contains(&marker.to_ascii_lowercase())
        {
            report.error(format!(
                "locator path {} does not contain the {marker} endpoint",
                url.path()
            ));
        }
    }

    fn check_report_param(&self, url: &Url, expected: &str, report: &mut LocatorReport) {
        let param = self.rules.report_param.trim();
        match query_value(url, param) {
            None => report.error(format!("locator is missing the {param} parameter")),
            Some(found) if found.trim().is_empty() => {
                report.error(format!("locator has an empty {param} parameter"));
            }
            Some(found) if found != expected.trim() => report.error(format!(
                "locator {param} mismatch: expected {}, found {found}",
                expected.trim()
            )),
            Some(_) => {}
        }
    }

    fn check_group_param(&self, url: &Url, report: &mut LocatorReport) {
        let param = self.rules.group_param.trim();
        if query_value(url, param).is_none_or(|value| value.trim().is_empty()) {
            report.warning(format!(
                "locator is missing the {param} parameter; embedding without a workspace scope"
            ));
        }
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.into_owned())
}
