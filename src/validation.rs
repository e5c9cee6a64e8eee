//! Field-level input checks shared by the request types.
//!
//! Request bodies derive `validator::Validate`; the custom rules they reference
//! live here together with the query-string helpers (sorting, pagination).

use std::borrow::Cow;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};
use crate::error::{AppError, Result};

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[1-9]\d{6,14}$").unwrap());
static POSTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\s-]{3,10}$").unwrap());
static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());
static COUPON_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{3,50}$").unwrap());

pub const SORT_COLUMNS: &[&str] = &["id", "name", "price", "created_at", "updated_at", "stock", "is_featured", "sort_order", "status"];
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PRICE: i64 = 1_000_000;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

pub fn email(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() { return Err(invalid("email", "email is required")); }
    if value.len() > 255 { return Err(invalid("email", "email is too long")); }
    if !EMAIL.is_match(value) { return Err(invalid("email", "invalid email format")); }
    Ok(())
}

/// Empty phone numbers are allowed; anything else must look like E.164.
pub fn phone(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || PHONE.is_match(value) { Ok(()) } else { Err(invalid("phone", "invalid phone format")) }
}

pub fn postal_code(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() { return Err(invalid("postal_code", "postal code is required")); }
    if !POSTAL.is_match(value) { return Err(invalid("postal_code", "invalid postal code format")); }
    Ok(())
}

pub fn slug(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() { return Err(invalid("slug", "slug is required")); }
    if value.len() > 100 { return Err(invalid("slug", "slug is too long")); }
    if !SLUG.is_match(value) { return Err(invalid("slug", "invalid slug format (use lowercase letters, numbers, and hyphens)")); }
    Ok(())
}

pub fn coupon_code(value: &str) -> Result<(), ValidationError> {
    if COUPON_CODE.is_match(value) { Ok(()) } else {
        Err(invalid("coupon_code", "coupon code must be 3 to 50 uppercase letters and numbers"))
    }
}

pub fn price(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() { return Err(invalid("price", "price cannot be negative")); }
    if *value > Decimal::from(MAX_PRICE) { return Err(invalid("price", "price is too high")); }
    Ok(())
}

pub fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() { Err(invalid("amount", "amount cannot be negative")) } else { Ok(()) }
}

/// Relative paths and absolute http(s) URLs are accepted; empty means "no image".
pub fn image_url(value: &str) -> Result<(), ValidationError> {
    let ok = value.is_empty()
        || (value.starts_with('/') && !value.contains(char::is_whitespace))
        || ((value.starts_with("http://") || value.starts_with("https://")) && value.len() > 8 && !value.contains(char::is_whitespace));
    if ok { Ok(()) } else { Err(invalid("url", "invalid URL format")) }
}

pub fn sort_column(value: Option<&str>) -> Result<&'static str> {
    let Some(value) = value.filter(|v| !v.is_empty()) else { return Ok("id") };
    let lowered = value.to_ascii_lowercase();
    SORT_COLUMNS.iter().copied().find(|c| *c == lowered)
        .ok_or_else(|| AppError::Validation(format!("invalid sort column: {lowered}")))
}

pub fn order_direction(value: Option<&str>) -> Result<&'static str> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("desc") => Ok("desc"),
        Some("asc") => Ok("asc"),
        Some(other) => Err(AppError::Validation(format!("invalid order direction: {other}"))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let limit = match limit {
            Some(l) if l < 1 => DEFAULT_PAGE_SIZE,
            Some(l) => l.min(MAX_PAGE_SIZE),
            None => DEFAULT_PAGE_SIZE,
        };
        Self { page, limit }
    }
    pub fn offset(&self) -> i64 { (self.page - 1) * self.limit }
}

/// Trims and truncates to at most `max_len` bytes on a char boundary.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= max_len { return trimmed.to_string(); }
    let mut end = max_len;
    while !trimmed.is_char_boundary(end) { end -= 1; }
    trimmed[..end].to_string()
}

/// Flattens validator output into one readable line, fields in name order.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut parts = Vec::new();
    collect(errors, "", &mut parts);
    if parts.is_empty() { "invalid input".into() } else { parts.join("; ") }
}

fn collect(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(name, _)| **name);
    for (name, kind) in fields {
        let path = if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let msg = e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| format!("invalid {}", e.code));
                    out.push(format!("{path}: {msg}"));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                let mut items: Vec<_> = items.iter().collect();
                items.sort_by_key(|(idx, _)| **idx);
                for (idx, inner) in items {
                    collect(inner, &format!("{path}[{idx}]"), out);
                }
            }
        }
    }
}
