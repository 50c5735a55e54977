//! Prints the operator's CustomResourceDefinitions as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{ElassandraDatacenter, ElassandraTask};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ElassandraDatacenter::crd(), ElassandraTask::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
