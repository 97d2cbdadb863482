/// Interactive homeopathy consultation in the terminal
///
/// Run with: cargo run --bin doctor_cli

use anyhow::Result;
use homeopathy_doctor_bot::cli::{run_until_interrupted, SessionEnd};
use homeopathy_doctor_bot::config::{Config, Requirements};
use homeopathy_doctor_bot::rag::HomeopathyDoctor;
use homeopathy_doctor_bot::session::ChatHistory;
use tokio::io::{self, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    println!("🚀 Starting Homeopathy AI Doctor Setup...");

    let config = Config::from_env()?;
    if let Err(e) = config.check_dependencies(Requirements::cli()).await {
        println!("❌ {}", e);
        return Ok(());
    }

    let doctor = match HomeopathyDoctor::new(&config).await {
        Ok(doctor) => doctor,
        Err(e) => {
            println!("❌ Failed to start bot: {:#}", e);
            return Ok(());
        }
    };

    let mut history = ChatHistory::new(config.max_conversation_history);
    let mut stdout = io::stdout();
    let stdin = BufReader::new(io::stdin());

    let end = run_until_interrupted(
        &doctor,
        &mut history,
        stdin,
        &mut stdout,
        tokio::signal::ctrl_c(),
    )
    .await?;

    if end == SessionEnd::Interrupted {
        // stdin is still blocked in a read the runtime would wait on forever
        std::process::exit(0);
    }

    Ok(())
}
