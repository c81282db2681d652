use kvault_core::{Backup, Restore, Unstructured};
use serde_json::Value as Json;

use super::{reset_metadata_and_status, Prepared, ResourceRestorer};

const CONTROLLER_UID_LABEL: &str = "controller-uid";

/// Jobs carry the uid of their old controller in the selector and template;
/// the API server rejects a create that still references it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRestorer;

impl ResourceRestorer for JobRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, _restore: &Restore, _backup: &Backup) -> Prepared {
        let mut obj = match reset_metadata_and_status(obj, false) {
            Ok(o) => o,
            Err(e) => return Prepared::err(e),
        };
        for path in [&["spec", "selector", "matchLabels"][..], &["spec", "template", "metadata", "labels"][..]] {
            if let Some(Json::Object(labels)) = obj.get_path_mut(path) {
                labels.remove(CONTROLLER_UID_LABEL);
            }
        }
        Prepared::ok(obj)
    }
}
