use uuid::Uuid;

/// Mints job identifiers.
///
/// Identifiers are 128-bit random (v4) UUIDs, rendered in canonical
/// lowercase `8-4-4-4-12` form by their `Display` impl when externalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
