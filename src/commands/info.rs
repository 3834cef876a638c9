//! Bootloader information commands

use std::error::Error;

use tockloader_core::protocol::Attribute;

use super::Session;

pub fn run_info(session: &mut Session) -> Result<(), Box<dyn Error>> {
    let info = session.info()?;
    println!("Bootloader: {}", info);
    Ok(())
}

pub fn run_attributes(session: &mut Session) -> Result<(), Box<dyn Error>> {
    let attributes = session.attributes()?;
    if attributes.is_empty() {
        println!("No attributes set");
        return Ok(());
    }
    for (index, attribute) in attributes {
        println!("{:>2}: {:<8} = {}", index, attribute.key(), attribute.value_str());
    }
    Ok(())
}

pub fn run_set_attribute(
    session: &mut Session,
    index: u8,
    key: &str,
    value: &str,
) -> Result<(), Box<dyn Error>> {
    let attribute = Attribute::new(key, value.as_bytes())?;
    session.set_attribute(index, &attribute)?;
    println!("Set attribute {}: {} = {}", index, key, value);
    Ok(())
}
