//! Stock Discord commands - `stock` and `inventory`.
//!
//! Both are read paths over the inventory snapshot; nothing here changes stock.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{BotData, handlers::autocomplete},
        core::{
            inventory::{self, InventoryFilter, ProductStock, StockStatus},
            pricing::format_money,
            product,
        },
        errors::{Error, Result},
    };
    use std::fmt::Write;

    /// Stock status filter offered as a slash-command choice.
    #[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
    pub enum StatusChoice {
        #[name = "In stock"]
        InStock,
        #[name = "Low stock"]
        LowStock,
        #[name = "Out of stock"]
        OutOfStock,
    }

    impl From<StatusChoice> for StockStatus {
        fn from(choice: StatusChoice) -> Self {
            match choice {
                StatusChoice::InStock => Self::InStock,
                StatusChoice::LowStock => Self::LowStock,
                StatusChoice::OutOfStock => Self::OutOfStock,
            }
        }
    }

    /// Shows stock levels for one product.
    #[poise::command(slash_command)]
    pub async fn stock(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Product to look up"]
        #[autocomplete = "autocomplete::autocomplete_product_name"]
        product_name: String,
    ) -> Result<()> {
        let data = ctx.data();
        let Some(found) = product::get_product_by_name(&data.database, &product_name).await?
        else {
            ctx.say(format!("❌ No product named '{product_name}'."))
                .await?;
            return Ok(());
        };

        let row = ProductStock::from(&found);
        let mut message = format!(
            "**{}** ({})\n\
            • Price: {}\n\
            • On hand: {}\n\
            • Reserved: {}\n\
            • Available: **{}** - {}",
            row.name,
            row.sku.as_deref().unwrap_or("no SKU"),
            format_money(row.price, &data.settings.pricing),
            row.inventory,
            row.reserved,
            row.available,
            row.stock_status.label(),
        );
        if row.needs_reorder {
            let _ = write!(message, "\n• Reorder suggested: {} units", row.suggested_reorder);
        }
        ctx.say(message).await?;
        Ok(())
    }

    /// Shows catalogue-wide stock stats and the products matching a filter.
    #[poise::command(slash_command)]
    pub async fn inventory(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Part of a product name or SKU"] search: Option<String>,
        #[description = "Only products in this status"] status: Option<StatusChoice>,
        #[description = "Only products at or below their reorder point"] needs_reorder: Option<
            bool,
        >,
    ) -> Result<()> {
        let filter = InventoryFilter {
            search,
            status: status.map(Into::into),
            needs_reorder: needs_reorder.unwrap_or(false),
        };
        let snapshot = inventory::get_inventory_snapshot(&ctx.data().database, &filter).await?;

        let stats = snapshot.stats;
        let mut message = format!(
            "**Inventory**\n\
            Products: {} | Low stock: {} | Out of stock: {} | Active alerts: {}\n",
            stats.total_products,
            stats.low_stock_products,
            stats.out_of_stock_products,
            stats.active_alerts,
        );

        if snapshot.products.is_empty() {
            message.push_str("\nNo products match.");
        }
        // Discord messages are capped at 2000 characters
        for row in snapshot.products.iter().take(20) {
            let _ = write!(
                message,
                "\n• {}: {} available ({})",
                row.name,
                row.available,
                row.stock_status.label()
            );
        }
        if snapshot.products.len() > 20 {
            let _ = write!(message, "\n…and {} more", snapshot.products.len() - 20);
        }

        ctx.say(message).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
