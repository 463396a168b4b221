//! Order Discord command - status and totals of a committed order.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::BotData,
        core::{order, pricing::format_money},
        errors::{Error, Result},
    };
    use std::fmt::Write;

    /// Shows an order's status, lines and totals as they were charged.
    #[poise::command(slash_command)]
    pub async fn order(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Order number"] order_id: i64,
    ) -> Result<()> {
        let data = ctx.data();
        let pricing = &data.settings.pricing;
        let found = match order::get_order(&data.database, order_id).await {
            Ok(found) => found,
            Err(Error::OrderNotFound { .. }) => {
                ctx.say(format!("❌ Order #{order_id} does not exist."))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let o = &found.order;
        let mut message = format!("**Order #{}** - {}\n", o.id, o.status);
        for item in &found.items {
            let _ = writeln!(
                message,
                "• {} × {} @ {} = {}",
                item.quantity,
                item.product_name,
                format_money(item.unit_price, pricing),
                format_money(item.line_total, pricing),
            );
        }
        let _ = write!(
            message,
            "Subtotal: {}\nDiscount: -{}{}\nShipping: {}\nTax: {}\n**Total: {}**",
            format_money(o.subtotal, pricing),
            format_money(o.discount_amount, pricing),
            o.coupon_code
                .as_deref()
                .map(|code| format!(" ({code})"))
                .unwrap_or_default(),
            format_money(o.shipping_cost, pricing),
            format_money(o.tax_amount, pricing),
            format_money(o.total, pricing),
        );

        ctx.say(message).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
