//! Load a model module, print its descriptor and evaluate I(q).
//!
//! Run with:
//! ```bash
//! cargo build -p sphere-model
//! cargo run --example probe -- target/debug/libsphere_model.so
//! cargo run --example probe -- sphere_model   # searched on SASPLUGIN_MODEL_PATH
//! ```

use sasplugin::observability::init_metrics;
use sasplugin::prelude::*;
use std::env;
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sasplugin=info")),
        )
        .init();
    init_metrics();

    let Some(target) = env::args().nth(1) else {
        eprintln!("usage: probe <module path or name>");
        std::process::exit(2);
    };

    let factory = PluginModelFactory::new();
    let config = LoaderConfig::from_env();
    // SAFETY: The probe is pointed at a module the user chose to trust.
    let path = unsafe { factory.load_by_name(&target, &config)? };

    let info = factory.get_model_info()?;
    println!("{} ({})", info.name(), path.display());
    println!("  {}", info.description());
    println!("  ABI version {}", info.version());
    println!();
    println!("  {:<14} {:>12} {:>10}  flags", "parameter", "default", "unit");
    for parameter in info.parameters() {
        println!(
            "  {:<14} {:>12.4e} {:>10}  {:?}",
            parameter.name, parameter.default, parameter.unit, parameter.flags
        );
    }
    println!();

    let supported: Vec<_> = Calculation::ALL
        .into_iter()
        .filter(|&c| factory.supports(c))
        .map(Calculation::as_str)
        .collect();
    println!("  calculations: {}", supported.join(", "));

    let model = factory.create_model()?;
    model.calculate_q(None)?;

    let q: Vec<f64> = (0..8).map(|i| 0.001 * 2f64.powi(i)).collect();
    let iq = model.calculate_q(Some(&q))?;
    println!();
    println!("  {:>10} {:>14}", "q (1/A)", "I(q) (1/cm)");
    for (q, iq) in q.iter().zip(&iq) {
        println!("  {q:>10.4} {iq:>14.6e}");
    }
    println!();
    println!("  ER = {:.4}", model.calculate_er()?);
    println!("  VR = {:.4}", model.calculate_vr()?);

    Ok(())
}
