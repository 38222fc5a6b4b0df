use iter8_operator::crd::Iter8;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Iter8::crd())?);
    Ok(())
}
