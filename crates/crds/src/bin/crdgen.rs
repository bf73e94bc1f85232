//! Prints the CRD manifests for `kubectl apply -f -`.

use crds::{Cluster, Nodegroup};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Cluster::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&Nodegroup::crd())?);
    Ok(())
}
