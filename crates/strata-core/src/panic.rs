use std::any::Any;

/// Best-effort rendering of a panic payload captured by `std::panic::catch_unwind`.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return message;
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.as_str();
    }
    "<non-string panic payload>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_str_and_string_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_payload_to_str(&*payload), "boom");

        let payload = std::panic::catch_unwind(|| panic!("{}", String::from("formatted"))).unwrap_err();
        assert_eq!(panic_payload_to_str(&*payload), "formatted");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
        assert_eq!(panic_payload_to_str(&*payload), "<non-string panic payload>");
    }
}
