use anyhow::Result;
use cliclack::spinner;
use console::style;
use yanfeng_ai::task::EntityContext;

pub async fn execute(context: &EntityContext) -> Result<()> {
    let spin = spinner();
    spin.start(format!("Contacting {}", context.provider().config().host));

    match context.provider().check_connection().await {
        Ok(()) => {
            spin.stop(style("ModelScope API connection successful").green().to_string());
            Ok(())
        }
        Err(e) => {
            spin.stop(style("ModelScope API connection failed").red().to_string());
            Err(e.into())
        }
    }
}
