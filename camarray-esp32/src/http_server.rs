use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use camarray_core::{handle_capture, Camera, ImageResponder, CAPTURE_PATH};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use log::{error, info};

use crate::camera::{EspCameraDriver, EspPmLock, XclkGate};

pub type EspCamera = Camera<EspCameraDriver, XclkGate, Arc<EspPmLock>>;

/// Answers a single request. Either an image or a status, never both.
struct EspResponder<'a, 'r> {
    request: Option<Request<&'a mut EspHttpConnection<'r>>>,
}

impl ImageResponder for EspResponder<'_, '_> {
    type Error = anyhow::Error;

    fn send_image(&mut self, headers: &[(&str, &str)], body: &[u8]) -> anyhow::Result<()> {
        let Some(request) = self.request.take() else {
            bail!("response already sent");
        };
        let mut response = request.into_response(200, None, headers)?;
        response.write_all(body)?;
        Ok(())
    }

    fn send_status(&mut self, status: u16) -> anyhow::Result<()> {
        let Some(request) = self.request.take() else {
            bail!("response already sent");
        };
        request.into_status_response(status)?;
        Ok(())
    }
}

/// Start the HTTP server on port 80 with the capture route.
pub fn start(camera: Arc<Mutex<EspCamera>>) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        stack_size: 10240,
        ..Default::default()
    })?;

    server.fn_handler(CAPTURE_PATH, Method::Get, move |request| -> anyhow::Result<()> {
        let mut camera = camera
            .lock()
            .map_err(|_| anyhow!("camera mutex poisoned"))?;
        let mut responder = EspResponder {
            request: Some(request),
        };

        match handle_capture(&mut *camera, &mut responder) {
            Err(e) if e.is_fatal() => {
                error!("Capture pipeline is unusable ({}), restarting", e);
                esp_idf_hal::reset::restart();
            }
            // Already answered and logged.
            _ => Ok(()),
        }
    })?;

    info!("HTTP server listening on port 80, capture at {}", CAPTURE_PATH);
    Ok(server)
}
