use std::net::TcpListener;

use env_logger::Env;
use foundrscan::{configuration::get_configuration, services::AnalysisPipeline, startup::run};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().expect("Failed to read configuration.");
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address)?;

    let pipeline =
        AnalysisPipeline::new(&configuration).expect("Failed to build analysis pipeline.");

    run(listener, configuration, pipeline)?.await
}
