use chrono::{Duration, Utc};

use crate::api::ExchangeGateway;
use crate::db::Store;
use crate::models::Position;
use crate::Result;

/// Keeps position prices fresh from the exchange ticker
#[derive(Debug, Clone)]
pub struct PriceFeed {
    max_age: Duration,
}

impl PriceFeed {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Refresh `position` from the ticker when stale, or always when `force` is set.
    ///
    /// Returns the price the caller should evaluate against, or None when
    /// no usable price is available.
    pub async fn refresh(
        &self,
        store: &dyn Store,
        gateway: &dyn ExchangeGateway,
        instrument_name: &str,
        position: &mut Position,
        force: bool,
    ) -> Result<Option<f64>> {
        let now = Utc::now();
        if !force && !position.is_price_stale(now, self.max_age) {
            return Ok(position.current_price);
        }

        let Some(ticker) = gateway.get_ticker(instrument_name).await else {
            tracing::debug!(instrument = instrument_name, "No ticker, skipping price refresh");
            return Ok(None);
        };
        if ticker.last_price <= 0.0 {
            return Ok(None);
        }

        store
            .refresh_position_price(position.id, ticker.last_price, now)
            .await?;

        position.current_price = Some(ticker.last_price);
        position.price_updated_at = Some(now);
        position.unrealized_pnl = position.unrealized_pnl_at(ticker.last_price);

        tracing::debug!(
            instrument = instrument_name,
            position_id = position.id,
            price = ticker.last_price,
            pnl = position.unrealized_pnl,
            "Position price updated"
        );

        Ok(Some(ticker.last_price))
    }
}
