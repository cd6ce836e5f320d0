//! Terminal overlay viewer

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{connect, decode};
use crate::{
    config::WatchArgs,
    predictor::{Frame, Predictor, RenderLoop},
    transport::ServerEvent,
    utils::shutdown_signal,
};

/// Watch a channel until the connection drops or a signal arrives
pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let ws = connect(&args.url, &args.channel).await?;
    let (_sink, mut stream) = ws.split();
    info!("Watching channel '{}'", args.channel);

    let predictor = Arc::new(Mutex::new(Predictor::new()));
    let render = RenderLoop::spawn(Arc::clone(&predictor), args.frame_interval(), draw_frames());

    let result = tokio::select! {
        result = async {
            while let Some(frame) = stream.next().await {
                let Some(event) = decode(frame?) else { continue };
                if let ServerEvent::Error { message } = &event {
                    warn!("Server error: {}", message);
                    continue;
                }
                predictor
                    .lock()
                    .map_err(|_| anyhow!("Predictor lock poisoned"))?
                    .on_event(&event, Instant::now());
            }
            Ok::<_, anyhow::Error>(())
        } => result,
        signal = shutdown_signal() => signal.map_err(Into::into),
    };

    render.cancel().await;
    println!();
    result
}

/// How long the celebration banner stays up
const CELEBRATION: Duration = Duration::from_secs(3);

/// Renderer that redraws the current line only when the output changes
fn draw_frames() -> impl FnMut(&Frame) + Send + 'static {
    let mut last = String::new();
    let mut celebrating_until: Option<std::time::Instant> = None;
    move |frame| {
        let now = std::time::Instant::now();
        if frame.celebrate {
            celebrating_until = Some(now + CELEBRATION);
        }

        let mut line = if frame.hidden {
            String::new()
        } else {
            frame.text.clone()
        };
        if celebrating_until.is_some_and(|until| now < until) {
            line.push_str("  *** time! ***");
        }
        if line == last {
            return;
        }

        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\r\x1b[2K{}", line);
        let _ = stdout.flush();
        last = line;
    }
}
