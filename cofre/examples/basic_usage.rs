//! Basic usage example for `Cofre`.

use std::sync::Arc;

use cofre::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Cofre Basic Usage Example");
    println!("=========================\n");

    // A fixed demo key. Real deployments read DATA_ENCRYPTION_KEY.
    let keys = Arc::new(KeyManager::from_config(&"2a".repeat(32))?);
    println!("✓ KeyManager created ({keys:?})\n");

    let fields = FieldCodec::new(Arc::clone(&keys));
    let index = BlindIndex::new(Arc::clone(&keys));

    // Strings
    let stored = fields.encrypt_string("Maria")?;
    println!("Stored username: {stored}");
    println!("✓ Decrypted: {}", fields.decrypt_string(&stored));
    println!("✓ Same input, same envelope: {}\n", stored == fields.encrypt_string("Maria")?);

    // Numbers and booleans
    let price = fields.encrypt_number(22.5)?;
    println!("✓ Price round-trip: {:?}", fields.decrypt_number(&price));
    let flag = fields.encrypt_boolean(true)?;
    println!("✓ Flag round-trip: {}\n", fields.decrypt_boolean(&flag));

    // Legacy plaintext passes through
    println!("✓ Legacy value: {}\n", fields.decrypt_string("plain old value"));

    // Blind index
    let digest = index.hash_for_search(" MARIA ")?;
    println!("Blind index: {digest}");
    println!("✓ Normalized match: {}\n", digest == index.hash_for_search("maria")?);

    // Migrate an in-memory collection
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let report = runtime.block_on(async {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("users", Document::new("u1").with_field("username", "Maria").with_field("role", "admin"))
            .await?;

        let executor = MigrationExecutor::new(Arc::clone(&store), Arc::clone(&keys));
        let report = executor.run(&builtin::users()).await?;
        executor.ensure_indexes(&builtin::users()).await?;
        Ok::<_, Error>(report)
    })?;
    println!(
        "✓ Migrated {}: scanned {}, rewritten {}, legacy values {}",
        report.collection, report.scanned, report.rewritten, report.legacy_values
    );

    Ok(())
}
