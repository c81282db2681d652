use kvault_core::{Backup, Restore, Unstructured};
use serde_json::Value as Json;

use super::{reset_metadata_and_status, Prepared, ResourceRestorer};

/// Lets the target cluster allocate cluster IPs and node ports again.
/// Headless services keep `clusterIP: None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceRestorer;

impl ResourceRestorer for ServiceRestorer {
    fn handles(&self, _obj: &Unstructured, _restore: &Restore) -> bool { true }

    fn prepare(&self, obj: Unstructured, _restore: &Restore, _backup: &Backup) -> Prepared {
        let mut obj = match reset_metadata_and_status(obj, false) {
            Ok(o) => o,
            Err(e) => return Prepared::err(e),
        };
        let headless = obj.get_path(&["spec", "clusterIP"]).and_then(Json::as_str) == Some("None");
        if !headless {
            obj.remove_path(&["spec", "clusterIP"]);
        }
        if let Some(Json::Array(ports)) = obj.get_path_mut(&["spec", "ports"]) {
            for port in ports.iter_mut().filter_map(Json::as_object_mut) {
                port.remove("nodePort");
            }
        }
        Prepared::ok(obj)
    }
}
