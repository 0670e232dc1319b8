use super::CommandResult;
use crate::Result;
use crate::config::Bundle;
use crate::markers::{MarkerStatus, MarkerStore};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MarkerList {
    pub markers: Vec<MarkerStatus>,
}

impl CommandResult for MarkerList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.markers
            .iter()
            .map(|m| {
                format!(
                    "[{}] {:<12} {}",
                    if m.complete { "x" } else { " " },
                    m.marker.as_str(),
                    m.path.display()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn marker_list(bundle: &Bundle) -> Result<MarkerList> {
    let store = MarkerStore::new(&bundle.paths.data_dir);
    Ok(MarkerList {
        markers: store.list(),
    })
}
