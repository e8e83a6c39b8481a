//! Prints the CustomResourceDefinition manifests for installation.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use crds::Orderer;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("---\n{}", serde_yaml::to_string(&Orderer::crd())?);
    Ok(())
}
