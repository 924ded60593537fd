pub mod cache_headers;
pub mod request_id;
