use anyhow::{Result, bail};

use crate::config::Config;
use crate::store::{JsonVersionStore, VersionStore};

/// Register a user, or rename an existing one keeping their version counter.
pub fn add(id: &str, name: &str) -> Result<()> {
    let config = Config::load()?;
    let store = JsonVersionStore::new(config.store_path());
    let user = store.upsert_user(id, name)?;
    println!(
        "{} ({}) at version {} in {}",
        user.id,
        user.name,
        user.container_version,
        store.path().display()
    );
    Ok(())
}

pub fn show(id: &str) -> Result<()> {
    let config = Config::load()?;
    let store = JsonVersionStore::new(config.store_path());
    let Some(user) = store.get_user(id)? else {
        bail!("No such user: {id}");
    };
    println!("id:         {}", user.id);
    println!("name:       {}", user.name);
    println!("version:    {}", user.container_version);
    println!("repository: {}", config.repository_for(&user.id));
    Ok(())
}
