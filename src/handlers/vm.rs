// src/handlers/vm.rs

//! VM image handler
//!
//! Records a provisioning request for `spec.image_url`. The VM name comes
//! from the `vm_name` parameter, falling back to the resource name.

use super::{ResourceHandler, value_text};
use crate::error::{Error, Result};
use crate::recipe::{ParameterValues, RecipeResource};
use tracing::info;

#[derive(Debug, Default)]
pub struct VmImageHandler;

impl VmImageHandler {
    pub fn new() -> Self {
        Self
    }

    fn vm_name(resource: &RecipeResource, params: &ParameterValues) -> String {
        params
            .get("vm_name")
            .map(value_text)
            .unwrap_or_else(|| resource.name.clone())
    }
}

impl ResourceHandler for VmImageHandler {
    fn deploy(
        &self,
        resource: &RecipeResource,
        params: &ParameterValues,
        _namespace: Option<&str>,
    ) -> Result<String> {
        let image_url = resource.spec_str("image_url").unwrap_or_default();
        if image_url.is_empty() {
            return Err(Error::HandlerError(format!(
                "VM resource {} has no image_url",
                resource.name
            )));
        }

        let vm_name = Self::vm_name(resource, params);
        info!("Provisioning VM {} from {}", vm_name, image_url);
        Ok(format!("VM {vm_name} provisioning initiated"))
    }

    fn rollback(&self, resource: &RecipeResource, _namespace: Option<&str>) -> Result<()> {
        info!("Releasing VM resource {}", resource.name);
        Ok(())
    }

    fn check_health(&self, _resource: &RecipeResource, _namespace: Option<&str>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_vm_name_from_params() {
        let resource = RecipeResource::new("builder", ResourceKind::VmImage)
            .with_spec("image_url", json!("https://images.example.org/debian-12.qcow2"));
        let handler = VmImageHandler::new();

        let msg = handler.deploy(&resource, &ParameterValues::new(), None).unwrap();
        assert_eq!(msg, "VM builder provisioning initiated");

        let mut params = ParameterValues::new();
        params.insert("vm_name".to_string(), json!("ci-01"));
        let msg = handler.deploy(&resource, &params, None).unwrap();
        assert_eq!(msg, "VM ci-01 provisioning initiated");
    }

    #[test]
    fn test_requires_image_url() {
        let resource = RecipeResource::new("builder", ResourceKind::VmImage);
        assert!(
            VmImageHandler::new()
                .deploy(&resource, &ParameterValues::new(), None)
                .is_err()
        );
    }
}
