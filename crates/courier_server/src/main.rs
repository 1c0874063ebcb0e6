#![forbid(unsafe_code)]

mod config;
mod limiter;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use courier_util::endpoint::BindEndpoint;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::limiter::RateLimiter;
use crate::server::adapters::{InMemoryMessageStore, StaticParticipantDirectory};
use crate::server::auth::HmacVerifier;
use crate::server::dispatcher::EventDispatcher;
use crate::server::registry::ConnectionRegistry;
use crate::server::routes::build_router;
use crate::server::state::{AppState, GatewaySettings, HealthState};

/// Dev-only demo participant data enable flag.
const COURIER_ENABLE_DEMO_DATA_ENV: &str = "COURIER_ENABLE_DEMO_DATA";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: courier_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Listen endpoint (default: 127.0.0.1:8080)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<SocketAddr> {
	let mut bind_endpoint: Option<String> = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind_endpoint = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind_endpoint = bind_endpoint?;
	let bind = BindEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	let addr = bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	Some(addr)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,courier_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("courier_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: &str) {
	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_override = parse_args();

	let config_path = crate::config::default_config_path();
	let server_cfg = crate::config::ServerConfig::from_file(&config_path)?;

	init_metrics(&server_cfg.server.metrics_bind);

	let Some(auth_secret) = server_cfg.server.auth_hmac_secret.clone() else {
		return Err(anyhow::anyhow!(
			"no auth secret configured (set server.auth_hmac_secret or COURIER_AUTH_HMAC_SECRET)"
		));
	};

	let registry = ConnectionRegistry::new();

	let demo_enabled = cfg!(debug_assertions)
		&& std::env::var(COURIER_ENABLE_DEMO_DATA_ENV)
			.map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
			.unwrap_or(false);

	let directory = if demo_enabled {
		info!(
			env = COURIER_ENABLE_DEMO_DATA_ENV,
			"using demo participant directory (enabled by env)"
		);
		Arc::new(StaticParticipantDirectory::demo())
	} else {
		warn!("participant directory starts empty; chat fan-out finds no participants until it is seeded");
		Arc::new(StaticParticipantDirectory::new())
	};
	let dispatcher = Arc::new(EventDispatcher::new(registry.clone(), directory));
	let store = Arc::new(InMemoryMessageStore::new());

	let limiter = Arc::new(RateLimiter::new(
		server_cfg.limits.to_rule_set(),
		server_cfg.limits.limiter_config(),
	));
	let _sweeper = crate::limiter::spawn_sweeper(Arc::clone(&limiter));

	let health = HealthState::new();
	let state = AppState {
		registry,
		dispatcher,
		limiter,
		verifier: Arc::new(HmacVerifier::new(auth_secret)),
		store,
		settings: Arc::new(GatewaySettings {
			outbound_queue_capacity: server_cfg.server.outbound_queue_capacity,
			max_frame_bytes: server_cfg.server.max_frame_bytes,
			trust_forwarded_headers: server_cfg.server.trust_forwarded_headers,
		}),
		health: health.clone(),
	};

	let app = build_router(state);

	let bind_addr = match bind_override {
		Some(addr) => addr,
		None => server_cfg
			.server
			.bind
			.parse::<SocketAddr>()
			.map_err(|e| anyhow::anyhow!("invalid bind address {}: {e}", server_cfg.server.bind))?,
	};

	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	health.mark_ready();
	info!(bind = %bind_addr, "courier_server listening");

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

	Ok(())
}
