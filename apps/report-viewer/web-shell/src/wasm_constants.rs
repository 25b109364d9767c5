pub(crate) const DEFAULT_STATUS_ELEMENT_ID: &str = crate::viewer_state::DEFAULT_STATUS_ID;
pub(crate) const POWERBI_CLIENT_GLOBAL: &str = "powerbi-client";
pub(crate) const POWERBI_SERVICE_GLOBAL: &str = "powerbi";
pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";
pub(crate) const STATUS_COLOR_OK: &str = "#cbd5e1";
pub(crate) const STATUS_COLOR_ERROR: &str = "#f87171";
