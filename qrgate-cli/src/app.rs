//! Subcommand implementations: builds the services from config and
//! settings and runs them.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use qrgate_core::auth::{AuthClient, HttpTransport};
use qrgate_core::capture::{
    BufferPool, CaptureMethod, Frame, FrameSource, Region, dpi, open_backend,
};
use qrgate_core::decode::DecodeEngine;
use qrgate_core::error::QrGateError;
use qrgate_core::scan::{ScanOrchestrator, ScanServices};
use qrgate_core::ticket::ticket_of;

use crate::config::AppConfig;
use crate::console;
use crate::settings::UserSettings;

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Per-run overrides for `scan`.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub backend: Option<CaptureMethod>,
    pub no_auto_retry: bool,
}

impl ScanOverrides {
    fn touches_region(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.width.is_some() || self.height.is_some()
    }

    fn apply(&self, base: Region) -> Region {
        Region::new(
            self.x.unwrap_or(base.x),
            self.y.unwrap_or(base.y),
            self.width.unwrap_or(base.width),
            self.height.unwrap_or(base.height),
        )
    }
}

fn auth_client(config: &AppConfig, settings: &UserSettings) -> Result<AuthClient, QrGateError> {
    let transport = HttpTransport::new(config.network.base_url.clone())
        .map_err(|e| QrGateError::Other(e.to_string()))?;
    let mut auth_config = config.to_auth_config();
    auth_config.auto_login = settings.auto_login;
    let client = AuthClient::new(Arc::new(transport), auth_config);
    if settings.has_token() {
        client.set_token(&settings.token);
    }
    Ok(client)
}

fn decode_engine(config: &AppConfig, settings: &UserSettings) -> DecodeEngine {
    let mut decode = config.to_decode_config();
    decode.parallel_enhance |= settings.thread_pool_enabled;
    DecodeEngine::new(&decode, None)
}

// ── scan ─────────────────────────────────────────────────────────

pub async fn scan(
    config: &AppConfig,
    settings: &mut UserSettings,
    settings_path: &Path,
    overrides: ScanOverrides,
) -> AppResult<()> {
    if !settings.has_token() {
        warn!("no account token; run `qrgate login` first or the service will reject tickets");
    }

    let mut scan_config = config.to_scan_config();
    let base = settings.region.unwrap_or(scan_config.region);
    scan_config.region = overrides.apply(base);
    scan_config.auto_retry = settings.auto_retry && !overrides.no_auto_retry;
    if scan_config.region.is_empty() {
        return Err(QrGateError::Other(format!("empty capture region {}", scan_config.region)).into());
    }

    let mut changed = false;
    if overrides.touches_region() {
        settings.region = Some(scan_config.region);
        changed = true;
    }
    if let Some(backend) = overrides.backend {
        settings.capture_backend = Some(backend);
        changed = true;
    }
    if changed {
        settings.save(settings_path)?;
    }

    let pool = Arc::new(BufferPool::with_cap(config.capture.pool_cap.max(1)));
    if config.capture.prewarm {
        pool.prewarm_common();
    }
    let source = FrameSource::probe(settings.capture_backend, Arc::clone(&pool));
    if source.is_empty() {
        return Err(QrGateError::BackendUnavailable("no capture backend initialised").into());
    }
    info!(
        "capture chain: {:?} (scale {:.2})",
        source.methods(),
        source.scale()
    );

    let services = ScanServices::new(
        Arc::new(source),
        decode_engine(config, settings),
        auth_client(config, settings)?,
    );
    let perf = Arc::clone(&services.perf);
    let (handle, events, task) = ScanOrchestrator::spawn(services, scan_config);
    handle.start().await?;

    let succeeded = console::run(handle.clone(), events).await?;
    handle.shutdown().await.ok();
    task.await.ok();

    let summary = perf
        .lock()
        .map(|p| p.summary())
        .unwrap_or_else(|poisoned| poisoned.into_inner().summary());
    if summary.scans > 0 {
        println!("{summary}");
    }
    if succeeded {
        println!("done");
    }
    Ok(())
}

// ── account ──────────────────────────────────────────────────────

pub async fn login(
    config: &AppConfig,
    settings: &mut UserSettings,
    settings_path: &Path,
    mobile: &str,
    code: &str,
) -> AppResult<()> {
    let client = auth_client(config, settings)?;
    let session = client.sdk_login(mobile, code).await?;
    settings.token = session.token;
    settings.uid = session.user_id;
    settings.save(settings_path)?;
    println!("logged in as {} ({})", session.user_name, settings.uid);
    Ok(())
}

pub async fn sms(config: &AppConfig, settings: &UserSettings) -> AppResult<()> {
    let client = auth_client(config, settings)?;
    let resp = client.send_sms().await;
    if resp.is_ok() {
        println!("SMS sent");
        Ok(())
    } else {
        Err(QrGateError::Rejected {
            code: resp.code,
            msg: resp.message_or("SMS request failed"),
        }
        .into())
    }
}

// ── diagnostics ──────────────────────────────────────────────────

pub async fn probe(config: &AppConfig, settings: &UserSettings) -> AppResult<()> {
    println!("display scale: {:.2}", dpi::display_scale());
    for method in CaptureMethod::CHAIN {
        match open_backend(method) {
            Ok(_) => println!("{method:>7}: available"),
            Err(e) => println!("{method:>7}: {e}"),
        }
    }
    let client = auth_client(config, settings)?;
    match client.measure_latency().await {
        Some(rtt) => println!("service latency: {rtt:?}"),
        None => println!("service unreachable"),
    }
    Ok(())
}

/// Decode a screenshot from disk with the same pipeline as `scan`.
pub async fn decode_file(config: &AppConfig, settings: &UserSettings, path: &Path) -> AppResult<()> {
    let rgb = image::open(path)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let frame = Frame::from_rgb(width, height, Region::new(0, 0, width, height), rgb.into_raw());
    let engine = decode_engine(config, settings);
    match engine.scan(frame).await {
        Some(hit) => {
            println!("payload: {}", hit.payload);
            println!("ticket:  {}", ticket_of(&hit.payload));
            println!("via {} candidate, {} decoder", hit.kind, hit.decoder);
            if let Some(bounds) = hit.bounds {
                println!("at {bounds}");
            }
        }
        None => println!("no code containing {:?} found", engine.marker()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_patch_individual_fields() {
        let overrides = ScanOverrides {
            x: Some(5),
            height: Some(50),
            ..ScanOverrides::default()
        };
        assert!(overrides.touches_region());
        assert_eq!(
            overrides.apply(Region::new(1, 2, 300, 400)),
            Region::new(5, 2, 300, 50)
        );
        assert!(!ScanOverrides::default().touches_region());
    }

    #[test]
    fn settings_flow_into_clients() {
        let config = AppConfig::default();
        let settings = UserSettings {
            token: "abc".into(),
            auto_login: true,
            ..UserSettings::default()
        };
        let client = auth_client(&config, &settings).unwrap();
        assert!(client.has_token());
        assert!(client.config().auto_login);
    }
}
