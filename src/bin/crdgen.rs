use jsonserver_operator::JsonServer;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&JsonServer::crd())?);
    Ok(())
}
