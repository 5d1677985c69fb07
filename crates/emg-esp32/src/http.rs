//! Local control server on the ESP-IDF HTTP server.
//!
//! Runs in the httpd task; it only flips the shared measurement trigger.

use anyhow::Result;
use embedded_svc::io::Write;
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;

use emg_core::control::MEASURE_PATH;
use emg_core::{ControlEndpoint, ControlResponse};

/// Serve `GET /measure` and answer everything else with 404.
///
/// The returned server stops when dropped.
pub fn start_control_server(endpoint: ControlEndpoint) -> Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        uri_match_wildcard: true,
        ..Default::default()
    })?;

    let measure = endpoint.clone();
    server.fn_handler(MEASURE_PATH, Method::Get, move |req| {
        respond(req, measure.measure())
    })?;

    for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
        let fallback = endpoint.clone();
        server.fn_handler("/*", method, move |req| {
            let path = req.uri().to_string();
            respond(req, fallback.not_found(&path))
        })?;
    }

    log::info!("Control server started on port 80");
    Ok(server)
}

fn respond(req: Request<&mut EspHttpConnection>, response: ControlResponse) -> Result<()> {
    let mut resp = req.into_response(
        response.status,
        None,
        &[("Content-Type", ControlResponse::CONTENT_TYPE)],
    )?;
    resp.write_all(response.body.as_bytes())?;
    Ok(())
}
