use std::cell::Cell;
use std::fs::File;
use std::io::BufReader;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use output_capture::{
    Compositor, OutputMode, OutputTransform, ReadFormat, RecorderConfig, Rect, Region,
    ScreenshotOutcome, Screenshooter, ShmBuffer, ShmFormat, ToggleOutcome, WcapReader,
};
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FRAMES: u32 = 120;
const SQUARE: i32 = 48;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RecorderConfig::new(path),
        None => RecorderConfig::default(),
    };
    let path = config.path.clone();

    let (mut compositor, renderer) = Compositor::headless(ReadFormat::X8R8G8B8, false);
    let id = compositor.add_output(
        "HEADLESS-1",
        0,
        0,
        OutputMode::new(WIDTH, HEIGHT),
        OutputTransform::Normal,
        1,
    );
    renderer
        .attach_output(id, WIDTH, HEIGHT)
        .context("failed to allocate headless framebuffer")?;
    renderer.fill_rect(id, Rect::new(0, 0, WIDTH as i32, HEIGHT as i32), 0xFF20_2830);

    let mut shooter = Screenshooter::new(config);
    match shooter
        .toggle_recorder(&mut compositor)
        .context("failed to start recorder")?
    {
        ToggleOutcome::Started(_) => println!("Recording to {}", path.display()),
        other => bail!("unexpected toggle outcome {other:?}"),
    }

    let begin = Instant::now();
    let mut previous = Rect::new(0, 0, 0, 0);
    for frame in 0..FRAMES {
        let x = (frame as i32 * 5) % (WIDTH as i32 - SQUARE);
        let y = (frame as i32 * 3) % (HEIGHT as i32 - SQUARE);
        let square = Rect::new(x, y, x + SQUARE, y + SQUARE);
        renderer.fill_rect(id, previous, 0xFF20_2830);
        renderer.fill_rect(id, square, 0xFFE0_6020 + frame);

        let damage = Region::from_rects([previous, square]);
        compositor
            .finish_frame(id, frame * 16, &damage)
            .with_context(|| format!("frame {frame} failed"))?;
        previous = square;
    }
    let elapsed = begin.elapsed();

    let screenshot = ShmBuffer::new(WIDTH, HEIGHT, ShmFormat::Argb8888)?;
    let outcome = Rc::new(Cell::new(None));
    let sink = Rc::clone(&outcome);
    shooter.shoot(&mut compositor, id, screenshot.clone().into(), move |result| {
        sink.set(Some(result))
    });
    compositor.finish_frame(id, FRAMES * 16, &Region::new())?;
    if outcome.get() != Some(ScreenshotOutcome::Success) {
        bail!("screenshot failed: {:?}", outcome.get());
    }

    let stats = match shooter.toggle_recorder(&mut compositor)? {
        ToggleOutcome::Stopped(_, stats) => stats,
        other => bail!("unexpected toggle outcome {other:?}"),
    };
    println!(
        "Recorded {} frames ({} bytes) in {:.3} ms",
        stats.frames_written,
        stats.total_bytes,
        elapsed.as_secs_f64() * 1000.0
    );

    let file = File::open(&path).with_context(|| format!("failed to reopen {}", path.display()))?;
    let mut reader = WcapReader::new(BufReader::new(file))?;
    let mut decoded = 0;
    while reader.next_frame()?.is_some() {
        decoded += 1;
    }
    let mismatched = (0..HEIGHT)
        .flat_map(|y| (0..WIDTH).map(move |x| (x, y)))
        .filter(|&(x, y)| {
            let shot = screenshot.pixel(x, y).map(|p| p & 0x00FF_FFFF);
            shot != reader.decoder().pixel(x, y)
        })
        .count();
    println!("Decoded {decoded} frames, {mismatched} pixels differ from the screenshot");
    Ok(())
}
