//! Associated-data strings binding ciphertexts to their context.
//!
//! Every sealed blob carries AAD naming what it is and where it sits, so
//! a ciphertext copied to a different slot (another entry, another field,
//! an older sync state) fails authentication instead of decrypting.

/// AAD for the main vault blob. Binds the schema version and the sync
/// version so a stale or replayed blob cannot be passed off as current.
pub fn vault_aad(schema_version: u32, sync_version: u64) -> String {
    format!("keyloft-vault:v{schema_version}:sync:{sync_version}")
}

/// AAD for a single encrypted entry field.
pub fn field_aad(entry_id: &str, field: &str) -> String {
    format!("keyloft-vault:entry:{entry_id}:field:{field}")
}

/// AAD for an entry's metadata blob. Sits outside the `field:` namespace,
/// so a secret field named "metadata" cannot collide with it.
pub fn metadata_aad(entry_id: &str) -> String {
    format!("keyloft-vault:entry:{entry_id}:metadata")
}

/// AAD for the device settings blob.
pub const SETTINGS_AAD: &str = "keyloft-vault:settings";

/// AAD for the sync transport configuration blob.
pub const SYNC_CONFIG_AAD: &str = "keyloft-vault:sync-config";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_aad_embeds_both_versions() {
        assert_eq!(vault_aad(3, 17), "keyloft-vault:v3:sync:17");
        assert_ne!(vault_aad(3, 17), vault_aad(3, 18));
        assert_ne!(vault_aad(3, 17), vault_aad(2, 17));
    }

    #[test]
    fn field_aad_distinguishes_entries_and_fields() {
        let a = field_aad("entry-1", "password");
        assert_eq!(a, "keyloft-vault:entry:entry-1:field:password");
        assert_ne!(a, field_aad("entry-1", "totp"));
        assert_ne!(a, field_aad("entry-2", "password"));
    }

    #[test]
    fn metadata_aad_never_collides_with_a_field() {
        assert_ne!(metadata_aad("entry-1"), field_aad("entry-1", "metadata"));
    }
}
