//! 通知文案
//!
//! 金额按最小货币单位原样展示。

pub fn welcome(name: &str) -> String {
    format!("Welcome to WalletWave, {name}! 🎉")
}

/// 付款成功，发给付款方
pub fn debit_success(amount: i64, receiver_name: &str) -> String {
    format!("Your payment of ${amount} to {receiver_name} was SUCCESSFUL.")
}

/// 收款成功，发给收款方
pub fn credit_success(amount: i64, sender_name: &str) -> String {
    format!("You received ${amount} from {sender_name}.")
}

/// 付款失败，发给付款方
pub fn debit_failure(amount: i64, receiver_name: &str, reason: Option<&str>) -> String {
    let mut message = format!("Your payment of ${amount} to {receiver_name} FAILED.");
    if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
        message.push_str(&format!(" Reason: {reason}"));
    }
    message
}
