/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a short reference id for an order (5 random bytes, upper hex).
///
/// Shown to the buyer on the payment message and carried into the
/// transaction ledger so an operator can reconcile a payment manually.
/// Not used for automatic payment matching.
pub fn ref_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_id_is_ten_upper_hex_chars() {
        let id = ref_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_uppercase());
    }
}
