//! Global ID compose/decode commands.

use microwork_core::{BoxId, GlobalId};

/// Runs the compose command.
pub fn compose(box_id: u16, local_id: u64) -> Result<(), Box<dyn std::error::Error>> {
    let origin = if box_id == 0 {
        None
    } else {
        Some(BoxId::new(box_id)?)
    };
    let id = GlobalId::compose(origin, local_id)?;
    println!("{}", id.value());
    Ok(())
}

/// Runs the decode command.
pub fn decode(value: u64) {
    let id = GlobalId::from_value(value);
    match id.box_part() {
        Some(box_id) => println!("origin:   box {box_id}"),
        None => println!("origin:   center"),
    }
    println!("local_id: {}", id.local_part());
}
