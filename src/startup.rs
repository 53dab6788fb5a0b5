use std::net::TcpListener;

use actix_web::{
    dev::Server,
    middleware::Logger,
    web::{self},
    App, HttpServer,
};

use crate::{
    configuration::Settings,
    routes::{
        analysis_route::{self, JobStore},
        default_route,
    },
    services::AnalysisPipeline,
};

pub fn run(
    listener: TcpListener,
    configuration: Settings,
    pipeline: AnalysisPipeline,
) -> Result<Server, std::io::Error> {
    let configuration = web::Data::new(configuration);
    let pipeline = web::Data::new(pipeline);
    let job_store = web::Data::new(JobStore::default());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .service(default_route::default)
            .service(
                web::scope("/analysis")
                    .service(analysis_route::submit_analysis)
                    .service(analysis_route::analysis_status),
            )
            .app_data(configuration.clone())
            .app_data(pipeline.clone())
            .app_data(job_store.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
