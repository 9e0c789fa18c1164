//! Request builders for the lume VM API.
//!
//! These only marshal data into [`RequestDescriptor`]s. VM payloads are
//! passed through as JSON; the backend owns their schema.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lumekit_core::RequestDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Image pulls download whole VM images and get a longer total timeout.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_REGISTRY: &str = "ghcr.io";
pub const DEFAULT_ORGANIZATION: &str = "trycua";
pub const DEFAULT_TAG: &str = "latest";

/// A VM image in a container registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Image name without tag.
    pub image: String,
    pub tag: String,
    pub registry: String,
    pub organization: String,
}

impl ImageRef {
    /// `image:latest` on the default registry and organization.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: DEFAULT_TAG.to_string(),
            registry: DEFAULT_REGISTRY.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    /// `image:tag`
    pub fn full_image(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = std::convert::Infallible;

    /// `"name"` gets the `latest` tag; `"name:tag"` keeps its tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once(':') {
            Some((image, tag)) if !tag.is_empty() => Self::new(image).with_tag(tag),
            Some((image, _)) => Self::new(image),
            None => Self::new(s),
        })
    }
}

impl From<&str> for ImageRef {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(image) => image,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.registry,
            self.organization,
            self.full_image()
        )
    }
}

/// Source and target of a VM clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneSpec {
    pub name: String,
    pub new_name: String,
}

impl CloneSpec {
    pub fn new(name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_name: new_name.into(),
        }
    }
}

pub fn list_vms() -> RequestDescriptor {
    RequestDescriptor::get("/vms")
}

pub fn get_vm(name: &str) -> RequestDescriptor {
    RequestDescriptor::get(format!("/vms/{name}"))
}

pub fn create_vm(spec: Value) -> RequestDescriptor {
    RequestDescriptor::post("/vms").with_body(spec)
}

/// Run a VM; without options the display is shown.
pub fn run_vm(name: &str, opts: Option<Value>) -> RequestDescriptor {
    let opts = opts.unwrap_or_else(|| json!({ "noDisplay": false }));
    RequestDescriptor::post(format!("/vms/{name}/run")).with_body(opts)
}

pub fn stop_vm(name: &str) -> RequestDescriptor {
    RequestDescriptor::post(format!("/vms/{name}/stop"))
}

pub fn update_vm(name: &str, params: Value) -> RequestDescriptor {
    RequestDescriptor::patch(format!("/vms/{name}")).with_body(params)
}

pub fn delete_vm(name: &str) -> RequestDescriptor {
    RequestDescriptor::delete(format!("/vms/{name}"))
}

pub fn clone_vm(spec: &CloneSpec) -> RequestDescriptor {
    RequestDescriptor::post("/vms/clone").with_body(json!(spec))
}

/// Pull `image`, optionally creating a VM called `name` from it.
pub fn pull_image(image: &ImageRef, name: Option<&str>) -> RequestDescriptor {
    RequestDescriptor::post("/pull")
        .with_body(json!({
            "image": image.full_image(),
            "name": name,
            "registry": image.registry,
            "organization": image.organization,
        }))
        .with_timeout(PULL_TIMEOUT)
}

pub fn images(organization: Option<&str>) -> RequestDescriptor {
    let req = RequestDescriptor::get("/images");
    match organization {
        Some(org) => req.with_query("organization", org),
        None => req,
    }
}

pub fn latest_ipsw() -> RequestDescriptor {
    RequestDescriptor::get("/ipsw")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumekit_core::Method;

    #[test]
    fn test_image_ref_defaults() {
        let image: ImageRef = "macos-sequoia-vanilla".parse().unwrap();
        assert_eq!(image.full_image(), "macos-sequoia-vanilla:latest");
        assert_eq!(image.registry, "ghcr.io");
        assert_eq!(image.organization, "trycua");
        assert_eq!(
            image.to_string(),
            "ghcr.io/trycua/macos-sequoia-vanilla:latest"
        );
    }

    #[test]
    fn test_image_ref_keeps_tag() {
        let image = ImageRef::from("macos-sequoia-vanilla:15.2");
        assert_eq!(image.image, "macos-sequoia-vanilla");
        assert_eq!(image.tag, "15.2");
        assert_eq!(ImageRef::from("ubuntu:").tag, "latest");
    }

    #[test]
    fn test_pull_payload() {
        let image = ImageRef::new("ubuntu-noble").with_organization("acme");
        let req = pull_image(&image, Some("builder"));

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/pull");
        assert_eq!(req.timeout, Some(PULL_TIMEOUT));
        assert_eq!(
            req.body,
            Some(json!({
                "image": "ubuntu-noble:latest",
                "name": "builder",
                "registry": "ghcr.io",
                "organization": "acme",
            }))
        );
    }

    #[test]
    fn test_clone_uses_camel_case() {
        let req = clone_vm(&CloneSpec::new("dev", "dev-copy"));
        assert_eq!(req.body, Some(json!({"name": "dev", "newName": "dev-copy"})));
    }

    #[test]
    fn test_run_defaults_to_display() {
        let req = run_vm("dev", None);
        assert_eq!(req.path, "/vms/dev/run");
        assert_eq!(req.body, Some(json!({"noDisplay": false})));
    }

    #[test]
    fn test_images_query() {
        assert!(images(None).query.is_empty());
        assert_eq!(
            images(Some("trycua")).query,
            vec![("organization".to_string(), "trycua".to_string())]
        );
    }
}
