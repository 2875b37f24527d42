//! `spoolsync slots`: List addressable tray slots.

use spoolsync_core::{SlotAddress, Topology};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("{:<8} {:>5} {:>5}  {:<10} {:>4}", "Slot", "Unit", "Tray", "Kind", "Bit");
    for slot in SlotAddress::all_addressable() {
        let kind = match slot.topology() {
            Some(Topology::Quad) => "AMS",
            Some(Topology::HighTemp) => "AMS HT",
            Some(Topology::External) => "External",
            None => continue,
        };
        println!(
            "{:<8} {:>5} {:>5}  {:<10} {:>4}",
            slot.display_name(),
            slot.unit_id,
            slot.tray_index,
            kind,
            slot.bit_position()?
        );
    }
    Ok(())
}
