//! Issue an identity token for local development.
//!
//! Usage: `mint-token <user-id> [display-name] [ttl-secs]`, signing with
//! `LIVE_ARENA_TOKEN_SECRET`.

use std::env;

use anyhow::{Context, bail};
use live_arena_back::services::identity::{TOKEN_SECRET_ENV, TokenVerifier};

const DEFAULT_TTL_SECS: i64 = 12 * 60 * 60;

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let Some(user_id) = args.next() else {
        bail!("usage: mint-token <user-id> [display-name] [ttl-secs]");
    };
    let display_name = args.next().unwrap_or_else(|| user_id.clone());
    let ttl_secs = match args.next() {
        Some(value) => value.parse::<i64>().context("ttl-secs must be an integer")?,
        None => DEFAULT_TTL_SECS,
    };

    let secret = env::var(TOKEN_SECRET_ENV).with_context(|| format!("{TOKEN_SECRET_ENV} is not set"))?;
    let token = TokenVerifier::new(secret)?.mint(&user_id, &display_name, ttl_secs)?;
    println!("{token}");
    Ok(())
}
