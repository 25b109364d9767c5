use super::*;

/// The viewer's container element plus the document it lives in.
pub(super) struct DomSurface {
    document: Document,
    container: HtmlElement,
}

impl DomSurface {
    pub(super) fn locate(container_id: &str) -> Result<Self, String> {
        let window = web_sys::window().ok_or_else(|| "window is unavailable".to_string())?;
        let document = window
            .document()
            .ok_or_else(|| "document is unavailable".to_string())?;
        let container = document
            .get_element_by_id(container_id)
            .ok_or_else(|| format!("container #{container_id} not found"))?
            .dyn_into::<HtmlElement>()
            .map_err(|_| format!("container #{container_id} is not an html element"))?;
        Ok(Self {
            document,
            container,
        })
    }

    pub(super) fn container(&self) -> HtmlElement {
        self.container.clone()
    }
}

impl EmbedSurface for DomSurface {
    fn container_present(&self) -> bool {
        self.container.is_connected()
    }

    fn child_count(&self) -> usize {
        self.container.child_nodes().length() as usize
    }

    fn widget_attributes(&self, signature: &ArtifactSignature) -> Vec<String> {
        self.container
            .get_attribute_names()
            .iter()
            .filter_map(|name| name.as_string())
            .filter(|name| signature.matches_attribute(name))
            .collect()
    }

    fn clear_children(&self) {
        while let Some(child) = self.container.first_child() {
            if self.container.remove_child(&child).is_err() {
                break;
            }
        }
    }

    fn remove_attribute(&self, name: &str) {
        let _ = self.container.remove_attribute(name);
    }

    fn purge_document_artifacts(&self, signature: &ArtifactSignature) -> usize {
        let Some(selectors) = selector_list(signature) else {
            return 0;
        };
        let Ok(nodes) = self.document.query_selector_all(&selectors) else {
            return 0;
        };
        let mut removed = 0;
        for index in 0..nodes.length() {
            let Some(node) = nodes.item(index) else {
                continue;
            };
            if let Some(parent) = node.parent_node() {
                if parent.remove_child(&node).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}
