//! Policy validation command.

use microwork_core::{PolicyKind, PolicyParams};

/// Runs the validate command.
pub fn validate(policy: &str, params: &str) -> Result<(), Box<dyn std::error::Error>> {
    let kind = PolicyKind::from_name(policy)?;
    let raw: serde_json::Value = serde_json::from_str(params)?;
    let parsed = PolicyParams::parse(&raw)?;

    println!("policy:         {}", kind.name());
    println!("n:              {}", parsed.n);
    match parsed.max_per_worker {
        Some(cap) => println!("max_per_worker: {cap}"),
        None => println!("max_per_worker: unlimited"),
    }
    if parsed.tags.is_empty() {
        println!("tags:           (none)");
    } else {
        println!("tags:           {}", parsed.tags.join(", "));
    }
    Ok(())
}
