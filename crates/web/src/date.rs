//! Cached `Date` header value.
//!
//! Formatting the date for every response is wasted work. The formatted value is cached
//! together with the second it was made for, and the first read in a new second replaces it.
//! Nothing depends on a runtime, so the value stays current for every runtime in the process.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;

static DATE_SERVICE: Lazy<DateService> = Lazy::new(DateService::new);

struct CachedDate {
    second: u64,
    value: Bytes,
}

pub struct DateService {
    current: ArcSwap<CachedDate>,
}

impl DateService {
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new() -> Self {
        DateService { current: ArcSwap::from_pointee(CachedDate { second: unix_second(), value: now() }) }
    }

    pub fn http_date(&self) -> Option<HeaderValue> {
        let second = unix_second();
        let cached = self.current.load();
        let value = if cached.second == second {
            cached.value.clone()
        } else {
            let value = now();
            self.current.store(Arc::new(CachedDate { second, value: value.clone() }));
            value
        };
        HeaderValue::from_maybe_shared(value).ok()
    }
}

fn unix_second() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default()
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::from_owner(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn formats_imf_fixdate() {
        let value = DateService::get_global_instance().http_date().unwrap();
        let value = value.to_str().unwrap();
        // e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
        assert_eq!(value.len(), 29);
        assert!(value.ends_with(" GMT"));
    }

    #[test]
    fn stale_value_is_replaced_without_a_runtime() {
        let epoch = Bytes::from_static(b"Thu, 01 Jan 1970 00:00:00 GMT");
        let service = DateService { current: ArcSwap::from_pointee(CachedDate { second: 0, value: epoch.clone() }) };

        let value = service.http_date().unwrap();
        assert_ne!(value.as_bytes(), &epoch[..]);
        assert_ne!(service.current.load().second, 0);
    }
}
