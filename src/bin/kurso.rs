use anyhow::Result;
use kurso::cli::{actions::Action, actions::server, start};

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;

    match action {
        Action::Server(args) => server::execute(args).await?,
    }

    Ok(())
}
