mod args;
mod bot;
mod conf;
mod gateway;
mod outcome;
mod session;

use args::Args;
use clap::Parser;

pub use outcome::{Fatal, Outcome};

pub async fn run() -> Outcome {
    let args = Args::parse();
    args.init();

    let conf = match conf::Conf::load_or_create(&args.config) {
        Ok(Some(conf)) => conf,
        Ok(None) => {
            tracing::info!("edit {:?} and run again", args.config);
            return Outcome::ConfigCreated;
        }
        Err(e) => {
            tracing::error!("Invalid config in {:?}: {e:?}", args.config);
            return Fatal::Config(e.to_string()).into();
        }
    };
    tracing::debug!("auth method: {}", conf.auth_method);

    let gateway = match gateway::evolution::EvolutionGateway::new(&conf.evolution) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("Something went wrong: {e:#}");
            return Fatal::Startup(e).into();
        }
    };
    let outcome = bot::OnboardBot::new(conf, gateway, bot::Console::stdio())
        .run()
        .await;

    if let Outcome::Fatal(fatal) = &outcome {
        tracing::error!("exiting: {fatal:#}");
    }
    outcome
}
