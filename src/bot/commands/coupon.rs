//! Coupon Discord command - preview what a code is worth.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::BotData,
        core::{checkout, coupon::CouponDecision, pricing::format_money},
        errors::{Error, Result},
    };
    use rust_decimal::Decimal;

    /// Previews a coupon against a cart subtotal without redeeming it.
    #[poise::command(slash_command)]
    pub async fn coupon(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Coupon code"] code: String,
        #[description = "Cart subtotal (e.g. 1000.00)"] subtotal: String,
    ) -> Result<()> {
        let Ok(subtotal) = subtotal.trim().parse::<Decimal>() else {
            ctx.say(format!("❌ '{subtotal}' is not a valid amount."))
                .await?;
            return Ok(());
        };

        let data = ctx.data();
        let customer_key = format!("user:{}", ctx.author().id);
        let decision =
            checkout::preview_coupon(&data.database, &code, subtotal, Some(&customer_key)).await?;

        let message = match decision {
            CouponDecision::Valid { coupon, discount } => format!(
                "✅ **{}** takes {} off {}.",
                coupon.code,
                format_money(discount, &data.settings.pricing),
                format_money(subtotal, &data.settings.pricing),
            ),
            CouponDecision::Invalid { reason } => {
                format!("❌ Coupon '{}' cannot be used: {reason}", code.trim())
            }
        };
        ctx.say(message).await?;
        Ok(())
    }
}

// Re-export all commands
pub use inner::*;
