use anyhow::Result;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use guild_music::audio::pipeline::{FfmpegPipelineFactory, TranscodeSettings};
use guild_music::audio::{EngineContext, EngineRegistry};
use guild_music::console::{ConsoleCommand, ConsoleHost, HELP};
use guild_music::notify::LogNotifier;
use guild_music::sources::{CatalogClient, YtDlpClient};
use guild_music::voice::{LocalVoiceSink, VoiceChannelRef};
use guild_music::Config;

const CONSOLE_CHANNEL: u64 = 1;
const CONSOLE_USER: u64 = 1;

fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_music=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        // Manejar health check si es necesario
        if std::env::args().any(|arg| arg == "--health-check") {
            return health_check(&config).await;
        }
        run(config).await
    })
}

async fn run(config: Config) -> Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("guild-music/", env!("CARGO_PKG_VERSION")))
        .build()?;

    if !config.has_catalog_credentials() {
        warn!("⚠️ Sin credenciales del catálogo: los enlaces de Spotify fallarán");
    }

    let extractor = Arc::new(YtDlpClient::from_config(&config));
    let catalog = Arc::new(CatalogClient::from_config(http.clone(), &config));
    let pipelines = Arc::new(FfmpegPipelineFactory::new(
        http,
        extractor.clone(),
        TranscodeSettings::from_config(&config),
    ));

    let channel = VoiceChannelRef::new(
        GuildId::new(config.guild_id),
        ChannelId::new(CONSOLE_CHANNEL),
    );
    let ctx = EngineContext {
        config: Arc::new(config),
        resolver: extractor,
        catalog,
        notifier: Arc::new(LogNotifier::new(false)),
        voice: Arc::new(LocalVoiceSink::new()),
        pipelines,
        registry: EngineRegistry::new(),
    };

    let mut host = ConsoleHost::new(ctx, channel).with_requester(UserId::new(CONSOLE_USER));
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("🚀 Consola lista para {}", channel.guild_id);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                let _ = host.handle_command(ConsoleCommand::Quit).await;
                break;
            }
        };

        let Some(line) = line else {
            let _ = host.handle_command(ConsoleCommand::Quit).await;
            break;
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("❌ {e}");
                continue;
            }
        };

        let quit = command == ConsoleCommand::Quit;
        match host.handle_command(command).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => error!("❌ {}", e),
        }
        if quit {
            break;
        }
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = YtDlpClient::from_config(config).version().await;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    match yt_dlp {
        Ok(version) if ffmpeg.status.success() => {
            info!("✅ yt-dlp {} y ffmpeg disponibles", version);
            println!("OK");
            Ok(())
        }
        Ok(_) => anyhow::bail!("Dependencias faltantes: ffmpeg"),
        Err(e) => anyhow::bail!("Dependencias faltantes: {e}"),
    }
}
