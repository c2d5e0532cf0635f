use async_trait::async_trait;

use crate::error::EngineResult;

/// Inline control button attached to a notification. `callback` round-trips
/// through the messenger and comes back as an [`OperatorAction`].
#[derive(Debug, Clone)]
pub struct Control {
    pub label: String,
    pub callback: String,
}

impl Control {
    pub fn new(label: impl Into<String>, action: OperatorAction) -> Self {
        Self {
            label: label.into(),
            callback: action.encode(),
        }
    }
}

/// Outbound notification channel to the human operator.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, text: &str) -> EngineResult<()>;

    /// Send with inline action buttons, one row per inner vec.
    async fn send_with_controls(&self, text: &str, controls: &[Vec<Control>]) -> EngineResult<()>;
}

/// Action the operator can take from a notification.
/// Wire form is `verb:SYMBOL`, e.g. `sell_now:BTC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    BuyNow(String),
    BuyFull(String),
    SetBuyAuto(String),
    SetBuyWatch(String),
    SellNow(String),
    SellHalf(String),
    DeferSell(String),
    KeepPosition(String),
    SetSellWatch(String),
    Mute(String),
}

impl OperatorAction {
    pub fn symbol(&self) -> &str {
        match self {
            OperatorAction::BuyNow(s)
            | OperatorAction::BuyFull(s)
            | OperatorAction::SetBuyAuto(s)
            | OperatorAction::SetBuyWatch(s)
            | OperatorAction::SellNow(s)
            | OperatorAction::SellHalf(s)
            | OperatorAction::DeferSell(s)
            | OperatorAction::KeepPosition(s)
            | OperatorAction::SetSellWatch(s)
            | OperatorAction::Mute(s) => s,
        }
    }

    pub fn encode(&self) -> String {
        let (verb, symbol) = match self {
            OperatorAction::BuyNow(s) => ("buy_now", s),
            OperatorAction::BuyFull(s) => ("buy_full", s),
            OperatorAction::SetBuyAuto(s) => ("buy_auto", s),
            OperatorAction::SetBuyWatch(s) => ("buy_watch", s),
            OperatorAction::SellNow(s) => ("sell_now", s),
            OperatorAction::SellHalf(s) => ("sell_half", s),
            OperatorAction::DeferSell(s) => ("sell_defer", s),
            OperatorAction::KeepPosition(s) => ("keep", s),
            OperatorAction::SetSellWatch(s) => ("sell_watch", s),
            OperatorAction::Mute(s) => ("mute", s),
        };
        format!("{verb}:{symbol}")
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (verb, symbol) = raw.split_once(':')?;
        if symbol.is_empty() {
            return None;
        }
        let symbol = symbol.to_string();
        match verb {
            "buy_now" => Some(OperatorAction::BuyNow(symbol)),
            "buy_full" => Some(OperatorAction::BuyFull(symbol)),
            "buy_auto" => Some(OperatorAction::SetBuyAuto(symbol)),
            "buy_watch" => Some(OperatorAction::SetBuyWatch(symbol)),
            "sell_now" => Some(OperatorAction::SellNow(symbol)),
            "sell_half" => Some(OperatorAction::SellHalf(symbol)),
            "sell_defer" => Some(OperatorAction::DeferSell(symbol)),
            "keep" => Some(OperatorAction::KeepPosition(symbol)),
            "sell_watch" => Some(OperatorAction::SetSellWatch(symbol)),
            "mute" => Some(OperatorAction::Mute(symbol)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_codec_round_trips() {
        let actions = vec![
            OperatorAction::BuyNow("BTC".into()),
            OperatorAction::BuyFull("ETH".into()),
            OperatorAction::SetBuyAuto("XRP".into()),
            OperatorAction::SetBuyWatch("SOL".into()),
            OperatorAction::SellNow("DOGE".into()),
            OperatorAction::SellHalf("ADA".into()),
            OperatorAction::DeferSell("BTC".into()),
            OperatorAction::KeepPosition("ETH".into()),
            OperatorAction::SetSellWatch("XRP".into()),
            OperatorAction::Mute("SOL".into()),
        ];
        for action in actions {
            assert_eq!(OperatorAction::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn decode_rejects_malformed() {
        assert_eq!(OperatorAction::decode("sell_now"), None);
        assert_eq!(OperatorAction::decode("sell_now:"), None);
        assert_eq!(OperatorAction::decode("warp:BTC"), None);
        assert_eq!(OperatorAction::decode(""), None);
    }
}
