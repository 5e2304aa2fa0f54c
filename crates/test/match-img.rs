//! Locate a template in a screenshot and print the match.
//!
//! Usage: match-img <frame.png> <template.png> [threshold]
//! Exits 0 when the best match reaches the threshold (default 0.8), 1 otherwise.

use std::process::ExitCode;
use std::time::Instant;

use lockstep_core::matcher::TemplateMatcher;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <frame.png> <template.png> [threshold]", args[0]);
        return ExitCode::from(2);
    }
    let threshold: f32 = match args.get(3).map(|s| s.parse()) {
        None => 0.8,
        Some(Ok(t)) => t,
        Some(Err(e)) => {
            eprintln!("bad threshold '{}': {}", args[3], e);
            return ExitCode::from(2);
        }
    };

    let load = |path: &str| match image::open(path) {
        Ok(img) => Some(img.to_luma8()),
        Err(e) => {
            eprintln!("cannot open {}: {}", path, e);
            None
        }
    };
    let (Some(frame), Some(template)) = (load(&args[1]), load(&args[2])) else {
        return ExitCode::from(2);
    };
    println!(
        "frame {}x{}, template {}x{}",
        frame.width(),
        frame.height(),
        template.width(),
        template.height()
    );

    let started = Instant::now();
    let found = TemplateMatcher::default().locate(&frame, &template);
    let elapsed = started.elapsed();

    match found {
        Some(m) => {
            let (cx, cy) = m.center();
            let verdict = if m.confidence >= threshold { "HIT" } else { "miss" };
            println!(
                "{} confidence {:.4} at ({}, {}) center ({}, {}) in {:.1} ms",
                verdict,
                m.confidence,
                m.x,
                m.y,
                cx,
                cy,
                elapsed.as_secs_f64() * 1000.0
            );
            if m.confidence >= threshold {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        None => {
            println!("template does not fit inside the frame");
            ExitCode::from(1)
        }
    }
}
