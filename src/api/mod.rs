//! Calibration control API.
//!
//! A small HTTP/1.1 server on its own thread, loopback-only by default, that
//! exposes zone calibration edits and store operations to operators. Every
//! request takes the registry lock for the duration of its edit, so the frame
//! loop never observes a half-applied change.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::SharedFrames;
use crate::registry::SharedRegistry;
use crate::store::RegistryStore;
use crate::zone::{IVec2, Zone, ZoneId, ZoneState, DEFAULT_ZONE_POSITION, DEFAULT_ZONE_SIZE};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8798".to_string(),
        }
    }
}

/// Shared state the control API operates on.
#[derive(Clone, Debug)]
pub struct ControlContext {
    pub registry: SharedRegistry,
    pub frames: SharedFrames,
    pub store: RegistryStore,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control api thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: ControlContext,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: ControlContext) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });
        log::info!("control api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: ControlContext, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &ctx) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ControlContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_api_response(&mut stream, &ApiResponse::error(403, "forbidden"));
    }

    let request = read_request(&mut stream)?;
    let response = route(ctx, &request.method, &request.target);
    log::debug!(
        "control api {} {} -> {}",
        request.method,
        request.target,
        response.status
    );
    write_api_response(&mut stream, &response)
}

/// Status code plus JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

/// Zone as reported by the API.
#[derive(Clone, Debug, Serialize)]
pub struct ZoneSummary {
    pub id: u64,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub state: ZoneState,
    pub usage_count: u32,
    pub selected: bool,
}

impl ZoneSummary {
    fn of(zone: &Zone, selected: Option<ZoneId>) -> Self {
        let position = zone.position();
        let size = zone.size();
        Self {
            id: zone.id().get(),
            name: zone.name().to_string(),
            x: position.x,
            y: position.y,
            w: size.x,
            h: size.y,
            state: zone.state(),
            usage_count: zone.usage_count(),
            selected: selected == Some(zone.id()),
        }
    }
}

/// Dispatch one request. `target` is the request path including any query.
pub fn route(ctx: &ControlContext, method: &str, target: &str) -> ApiResponse {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let outcome = match (method, segments.as_slice()) {
        ("GET", ["health"]) => Ok(ApiResponse::ok(json!({ "status": "ok" }))),
        ("GET", ["zones"]) => list_zones(ctx),
        ("GET", ["zones", "selected"]) => selected_zone(ctx),
        ("POST", ["zones"]) => add_zone(ctx, &params),
        ("POST", ["zones", id, action]) => match parse_id(id) {
            Some(id) => zone_action(ctx, id, action, &params),
            None => Ok(ApiResponse::error(404, "not_found")),
        },
        ("DELETE", ["zones", id]) => match parse_id(id) {
            Some(id) => remove_zone(ctx, id),
            None => Ok(ApiResponse::error(404, "not_found")),
        },
        ("POST", ["save"]) => save(ctx),
        ("POST", ["load"]) => load(ctx),
        (_, ["health"])
        | (_, ["zones"])
        | (_, ["zones", _])
        | (_, ["zones", _, _])
        | (_, ["save"])
        | (_, ["load"]) => Ok(ApiResponse::error(405, "method_not_allowed")),
        _ => Ok(ApiResponse::error(404, "not_found")),
    };
    outcome.unwrap_or_else(|err| {
        log::error!("control api {} {} failed: {:#}", method, path, err);
        ApiResponse::error(500, format!("{:#}", err))
    })
}

fn parse_id(raw: &str) -> Option<ZoneId> {
    raw.parse().ok()
}

fn list_zones(ctx: &ControlContext) -> Result<ApiResponse> {
    let registry = ctx.registry.lock()?;
    let selected = registry.selected().map(|zone| zone.id());
    let zones: Vec<ZoneSummary> = registry
        .iter()
        .map(|zone| ZoneSummary::of(zone, selected))
        .collect();
    Ok(ApiResponse::ok(serde_json::to_value(zones)?))
}

fn selected_zone(ctx: &ControlContext) -> Result<ApiResponse> {
    let registry = ctx.registry.lock()?;
    match registry.selected() {
        Some(zone) => Ok(ApiResponse::ok(serde_json::to_value(ZoneSummary::of(
            zone,
            Some(zone.id()),
        ))?)),
        None => Ok(ApiResponse::error(404, "no_selection")),
    }
}

fn add_zone(ctx: &ControlContext, params: &HashMap<String, String>) -> Result<ApiResponse> {
    let (position, size) = match parse_geometry(params, DEFAULT_ZONE_POSITION, DEFAULT_ZONE_SIZE) {
        Ok(geometry) => geometry,
        Err(message) => return Ok(ApiResponse::error(400, message)),
    };
    let Some((depth, color)) = ctx.frames.snapshot()?.pair() else {
        return Ok(ApiResponse::error(503, "no_frames_yet"));
    };

    let mut registry = ctx.registry.lock()?;
    let name = match params.get("name").map(|name| name.trim()) {
        Some("") => return Ok(ApiResponse::error(400, "name must not be empty")),
        Some(name) => name.to_string(),
        None => registry.next_default_name(),
    };
    if registry.by_name(&name).is_some() {
        return Ok(ApiResponse::error(409, format!("zone '{}' already exists", name)));
    }
    let id = registry.add(name, position, size, &depth.image, &color.image);
    registry.select(id)?;
    let Some(zone) = registry.get(id) else {
        return Err(anyhow!("{} vanished after add", id));
    };
    log::info!(
        "calibrated {} '{}' at {} size {}",
        id,
        zone.name(),
        zone.position(),
        zone.size()
    );
    Ok(ApiResponse::ok(serde_json::to_value(ZoneSummary::of(zone, Some(id)))?))
}

fn zone_action(
    ctx: &ControlContext,
    id: ZoneId,
    action: &str,
    params: &HashMap<String, String>,
) -> Result<ApiResponse> {
    // Frames are snapshotted before the registry lock is taken.
    let frames = match action {
        "recapture" | "refresh" | "geometry" => match ctx.frames.snapshot()?.pair() {
            Some(pair) => Some(pair),
            None => return Ok(ApiResponse::error(503, "no_frames_yet")),
        },
        "select" | "rename" => None,
        _ => return Ok(ApiResponse::error(404, "not_found")),
    };

    let mut registry = ctx.registry.lock()?;
    if action == "rename" {
        let name = match params.get("name").map(|name| name.trim()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Ok(ApiResponse::error(400, "name is required")),
        };
        if registry.get(id).is_none() {
            return Ok(ApiResponse::error(404, "unknown_zone"));
        }
        if registry.by_name(&name).is_some_and(|zone| zone.id() != id) {
            return Ok(ApiResponse::error(409, format!("zone '{}' already exists", name)));
        }
    }
    if action == "select" && registry.select(id).is_err() {
        return Ok(ApiResponse::error(404, "unknown_zone"));
    }
    let selected = registry.selected().map(|zone| zone.id());

    let Some(zone) = registry.get_mut(id) else {
        return Ok(ApiResponse::error(404, "unknown_zone"));
    };
    match (action, frames) {
        ("rename", _) => {
            if let Some(name) = params.get("name") {
                zone.rename(name.trim());
            }
        }
        ("recapture", Some((depth, color))) => zone.recapture(&depth.image, &color.image),
        ("refresh", Some((depth, color))) => zone.refresh(&depth.image, &color.image),
        ("geometry", Some((depth, color))) => {
            let (position, size) = match parse_geometry(params, zone.position(), zone.size()) {
                Ok(geometry) => geometry,
                Err(message) => return Ok(ApiResponse::error(400, message)),
            };
            zone.reposition(position, size, &depth.image, &color.image);
        }
        _ => {}
    }
    log::info!("{} '{}': {}", id, zone.name(), action);
    Ok(ApiResponse::ok(serde_json::to_value(ZoneSummary::of(zone, selected))?))
}

fn remove_zone(ctx: &ControlContext, id: ZoneId) -> Result<ApiResponse> {
    let mut registry = ctx.registry.lock()?;
    match registry.remove(id) {
        Some(zone) => {
            log::info!("removed {} '{}'", id, zone.name());
            Ok(ApiResponse::ok(json!({ "removed": id.get() })))
        }
        None => Ok(ApiResponse::error(404, "unknown_zone")),
    }
}

fn save(ctx: &ControlContext) -> Result<ApiResponse> {
    let registry = ctx.registry.lock()?;
    let written = ctx.store.save(&registry)?;
    Ok(ApiResponse::ok(json!({ "saved": written })))
}

fn load(ctx: &ControlContext) -> Result<ApiResponse> {
    let mut registry = ctx.registry.lock()?;
    let report = ctx.store.load()?;
    let skipped: Vec<_> = report
        .skipped
        .iter()
        .map(|record| json!({ "index": record.index, "name": record.name, "reason": record.reason }))
        .collect();
    registry.replace_with(report.registry);
    Ok(ApiResponse::ok(json!({ "loaded": registry.len(), "skipped": skipped })))
}

/// Geometry from `x`, `y`, `w`, `h` query parameters, falling back to the given values.
fn parse_geometry(
    params: &HashMap<String, String>,
    position: IVec2,
    size: IVec2,
) -> std::result::Result<(IVec2, IVec2), String> {
    let field = |key: &str, fallback: i32| -> std::result::Result<i32, String> {
        match params.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| format!("{} must be an integer", key)),
            None => Ok(fallback),
        }
    };
    Ok((
        IVec2::new(field("x", position.x)?, field("y", position.y)?),
        IVec2::new(field("w", size.x)?, field("h", size.y)?),
    ))
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    target: String,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let target = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    Ok(HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
    })
}

fn write_api_response(stream: &mut TcpStream, response: &ApiResponse) -> Result<()> {
    let body = serde_json::to_vec(&response.body)?;
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ColorFrame, ColorImage, DepthFrame, DepthImage};
    use image::{Luma, Rgb};

    fn context(dir: &std::path::Path) -> ControlContext {
        ControlContext {
            registry: SharedRegistry::default(),
            frames: SharedFrames::new(),
            store: RegistryStore::new(dir),
        }
    }

    fn feed_frames(ctx: &ControlContext) {
        let depth = DepthFrame::new(DepthImage::from_pixel(320, 240, Luma([900])), 1.0, 1);
        let color = ColorFrame::new(ColorImage::from_pixel(640, 480, Rgb([1, 2, 3])), 1);
        ctx.frames.store_depth(Arc::new(depth)).unwrap();
        ctx.frames.store_color(Arc::new(color)).unwrap();
    }

    #[test]
    fn add_without_frames_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        assert_eq!(route(&ctx, "POST", "/zones").status, 503);
    }

    #[test]
    fn add_uses_defaults_and_selects() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        feed_frames(&ctx);

        let response = route(&ctx, "POST", "/zones");
        assert_eq!(response.status, 200);
        assert_eq!(response.body["name"], "item0");
        assert_eq!(response.body["x"], 100);
        assert_eq!(response.body["w"], 50);
        assert_eq!(response.body["selected"], true);

        let selected = route(&ctx, "GET", "/zones/selected");
        assert_eq!(selected.body["name"], "item0");
    }

    #[test]
    fn geometry_edit_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        feed_frames(&ctx);
        let added = route(&ctx, "POST", "/zones?name=cup&x=10&y=10&w=20&h=20");
        let id = added.body["id"].as_u64().unwrap();

        let moved = route(&ctx, "POST", &format!("/zones/{}/geometry?x=310&y=-5", id));
        assert_eq!(moved.status, 200);
        assert_eq!(moved.body["x"], 300);
        assert_eq!(moved.body["y"], 0);
        assert_eq!(moved.body["w"], 20);
    }

    #[test]
    fn duplicate_names_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        feed_frames(&ctx);
        route(&ctx, "POST", "/zones?name=cup");
        let other = route(&ctx, "POST", "/zones?name=mug");
        assert_eq!(route(&ctx, "POST", "/zones?name=cup").status, 409);

        let id = other.body["id"].as_u64().unwrap();
        let renamed = route(&ctx, "POST", &format!("/zones/{}/rename?name=cup", id));
        assert_eq!(renamed.status, 409);
        let renamed = route(&ctx, "POST", &format!("/zones/{}/rename?name=Tea%20Box", id));
        assert_eq!(renamed.body["name"], "Tea Box");
    }

    #[test]
    fn bad_params_and_unknown_routes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        feed_frames(&ctx);
        assert_eq!(route(&ctx, "POST", "/zones?x=abc").status, 400);
        assert_eq!(route(&ctx, "DELETE", "/zones/42").status, 404);
        assert_eq!(route(&ctx, "POST", "/zones/42/select").status, 404);
        assert_eq!(route(&ctx, "GET", "/nope").status, 404);
        assert_eq!(route(&ctx, "PUT", "/zones").status, 405);
    }

    #[test]
    fn save_then_load_replaces_registry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        feed_frames(&ctx);
        route(&ctx, "POST", "/zones?name=cup");
        assert_eq!(route(&ctx, "POST", "/save").body["saved"], 1);

        route(&ctx, "POST", "/zones?name=mug");
        let loaded = route(&ctx, "POST", "/load");
        assert_eq!(loaded.status, 200);
        assert_eq!(loaded.body["loaded"], 1);
        let zones = route(&ctx, "GET", "/zones");
        assert_eq!(zones.body.as_array().unwrap().len(), 1);
        assert_eq!(zones.body[0]["name"], "cup");
    }

    #[test]
    fn server_answers_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            ctx,
        )
        .spawn()
        .unwrap();

        let mut stream = TcpStream::connect(handle.addr).unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));

        handle.stop().unwrap();
    }
}
