//! Load a geometry description, populate a volume manager and print it.
//!
//! ```text
//! cargo run -p volmgr-config --example dump_geometry -- [detector.toml] [one|tree]
//! ```

use volmgr::Topology;
use volmgr_config::Geometry;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/examples/detector.toml").into());
    let topology = match args.next().as_deref() {
        None | Some("tree") => Topology::Tree,
        Some("one") => Topology::One,
        Some(other) => {
            eprintln!("unknown topology '{other}': expected 'one' or 'tree'");
            std::process::exit(2);
        }
    };

    let geometry = match Geometry::from_file(&path) {
        Ok(geometry) => geometry,
        Err(err) => {
            eprintln!("{path}: {err}");
            std::process::exit(1);
        }
    };
    let manager = match geometry.volume_manager(topology) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("{path}: {err}");
            std::process::exit(1);
        }
    };

    println!("{manager}");
    println!();
    println!("{} placements in {} sections", manager.len(), manager.sections().count());

    for section in manager.root().subsections() {
        let Some(spec) = section.id_spec() else {
            continue;
        };
        let mut contexts: Vec<_> = section.contexts().collect();
        contexts.sort_unstable_by_key(|c| c.identifier);
        if let Some(ctx) = contexts.last() {
            let origin = ctx.local_to_world(Default::default());
            println!(
                "{}: last {} at ({:.2}, {:.2}, {:.2}) [{}]",
                section.name(),
                ctx.placement.name(),
                origin.x,
                origin.y,
                origin.z,
                spec.describe(ctx.identifier)
            );
        }
    }
}
