//! Autocomplete handlers for Discord slash command parameters.
//!
//! Suggestions improve the user experience by offering valid options as the user types.

use crate::{bot::BotData, core::product, errors::Error};

/// Discord caps autocomplete lists at 25 entries.
const MAX_SUGGESTIONS: u64 = 25;

/// Provides autocomplete suggestions for product names.
///
/// Returns up to 25 active product names containing the partial input, alphabetically.
/// Only the bare name is returned so it matches the command parameter exactly.
pub async fn autocomplete_product_name(
    ctx: poise::Context<'_, BotData, Error>,
    partial: &str,
) -> Vec<String> {
    let db = &ctx.data().database;
    product::search_product_names(db, partial.trim(), MAX_SUGGESTIONS)
        .await
        .unwrap_or_default()
}
