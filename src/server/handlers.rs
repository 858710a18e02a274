// 🌐 API Handlers - One function per route, all answering with an Envelope

use super::{ApiError, ApiResult, AppState};
use crate::auth::{Principal, Privilege};
use crate::catalog::{EntryInput, ExportFormat, LocaleSubmission};
use crate::db::{EntryQuery, Pagination};
use crate::entities::CredentialInput;
use crate::envelope::Envelope;
use crate::error::CatalogError;
use crate::parser::parse_feed_bytes;
use crate::providers::ProviderKind;
use crate::telemetry::censor_key;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

// ============================================================================
// Query parameters
// ============================================================================
//
// Every parameter arrives as a string; typed values are parsed here so a bad
// value becomes an invalid_input envelope instead of a bare 400.

#[derive(Debug, Deserialize)]
pub struct SortParams {
    sort: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    url: Option<String>,
    brand: Option<String>,
    locale: Option<String>,
    new_url: Option<String>,
    fields: Option<String>,
    third_parties: Option<String>,
    #[serde(rename = "hrefLang")]
    hreflang: Option<String>,
    #[serde(flatten)]
    credentials: CredentialInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleParams {
    url: Option<String>,
    include_pages: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListParams {
    locale_url: Option<String>,
    limit: Option<String>,
    skip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    id: Option<String>,
    page_url: Option<String>,
    locale_url: Option<String>,
    #[serde(rename = "type")]
    entry_type: Option<String>,
    sku: Option<String>,
    active: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanParams {
    url: Option<String>,
    id: Option<String>,
    id_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyParams {
    issued_for: Option<String>,
    privilege: Option<String>,
    key_to_deactivate: Option<String>,
    check_key: Option<String>,
}

fn required(name: &str, value: Option<String>) -> Result<String, CatalogError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CatalogError::validation(format!("The {name} parameter is required.")))
}

fn parse_flag(name: &str, raw: Option<&str>) -> Result<Option<bool>, CatalogError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(Some(true)),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(Some(false)),
        Some(v) => Err(CatalogError::validation(format!(
            "The {name} parameter must be true or false, got {v:?}."
        ))),
    }
}

fn parse_number(name: &str, raw: Option<&str>) -> Result<Option<i64>, CatalogError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| {
            CatalogError::validation(format!("The {name} parameter must be a number, got {v:?}."))
        }),
    }
}

fn parse_format(raw: Option<&str>) -> Result<ExportFormat, CatalogError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(ExportFormat::default()),
        Some(v) => ExportFormat::parse(v).ok_or_else(|| {
            CatalogError::validation(format!("The format parameter must be xlsx or csv, got {v:?}."))
        }),
    }
}

fn parse_privilege(raw: Option<&str>) -> Result<Option<Privilege>, CatalogError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => Privilege::parse(v).map(Some).ok_or_else(|| {
            CatalogError::validation(format!("The privilege parameter must be read or readWrite, got {v:?}."))
        }),
    }
}

fn provider(segment: &str) -> Result<ProviderKind, CatalogError> {
    ProviderKind::from_path_segment(segment)
        .ok_or_else(|| CatalogError::not_found(format!("Unknown provider {segment:?}.")))
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/1/health
pub async fn health() -> Json<Envelope> {
    Json(Envelope::success(vec![json!({ "status": "ok" })]))
}

// ============================================================================
// Locales
// ============================================================================

/// GET /api/1/locales
pub async fn list_locales(
    State(state): State<AppState>,
    Query(params): Query<SortParams>,
) -> ApiResult<Json<Envelope>> {
    let locales = state.service.list_locales(params.sort.as_deref())?;
    Ok(Json(Envelope::from_items(&locales)?))
}

/// POST /api/1/locales - create or update, optional CSV feed as the body
pub async fn submit_locale(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let feed = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(parse_feed_bytes(&body)?)
    };

    let submission = LocaleSubmission {
        url: required("url", params.url)?,
        brand: params.brand,
        locale: params.locale,
        new_url: params.new_url,
        fields: params.fields,
        third_parties: params.third_parties,
        credentials: params.credentials,
        hreflang: params.hreflang,
        feed,
    };

    let report = state.service.submit_locale(submission, &principal.actor).await?;
    info!(
        locale_url = %report.locale.url_value(),
        new_locale = report.new_locale,
        actor = %principal.actor,
        "locale submitted"
    );

    let status = if report.new_locale {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let envelope = Envelope::from_item(&report.locale)?
        .with_info("newLocale", report.new_locale)
        .with_info("pagesFound", report.pages_found)
        .with_info("import", &report.import);
    Ok((status, Json(envelope)).into_response())
}

/// GET /api/1/locales/single
pub async fn get_locale(
    State(state): State<AppState>,
    Query(params): Query<LocaleParams>,
) -> ApiResult<Json<Envelope>> {
    let url = required("url", params.url)?;
    let include_pages = parse_flag("includePages", params.include_pages.as_deref())?.unwrap_or(false);
    let view = state.service.locale_view(&url, include_pages)?;
    Ok(Json(Envelope::from_item(&view)?))
}

/// DELETE /api/1/locales/single
pub async fn delete_locale(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<LocaleParams>,
) -> ApiResult<Json<Envelope>> {
    let url = required("url", params.url)?;
    let (locales, pages) = state.service.delete_locale(&url)?;
    info!(locale_url = %url, pages, actor = %principal.actor, "locale deleted");
    Ok(Json(
        Envelope::success(Vec::new())
            .with_info("deletedLocales", locales)
            .with_info("deletedPages", pages),
    ))
}

/// GET /api/1/locales/single/download - text/csv attachment
pub async fn download_locale(
    State(state): State<AppState>,
    Query(params): Query<LocaleParams>,
) -> ApiResult<Response> {
    let url = required("url", params.url)?;
    let format = parse_format(params.format.as_deref())?;
    let mut out = Vec::new();
    state.service.export(&url, format, &mut out)?;

    let filename = format!(
        "{}.{}",
        url.trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .replace('/', "-"),
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        out,
    )
        .into_response())
}

// ============================================================================
// Pages
// ============================================================================

/// GET /api/1/pages
pub async fn list_pages(
    State(state): State<AppState>,
    Query(params): Query<PageListParams>,
) -> ApiResult<Json<Envelope>> {
    let locale_url = required("localeUrl", params.locale_url)?;
    let page = Pagination::new(
        parse_number("limit", params.limit.as_deref())?,
        parse_number("skip", params.skip.as_deref())?,
    );
    let (entries, total) = state.service.list_entries(&locale_url, page)?;
    Ok(Json(
        Envelope::from_items(&entries)?
            .with_info("total", total)
            .with_info("limit", page.limit)
            .with_info("skip", page.skip),
    ))
}

/// GET /api/1/pages/single
pub async fn get_pages(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Envelope>> {
    let query = EntryQuery {
        id: params.id,
        url: params.page_url,
        locale_url: params.locale_url,
    };
    let entries = state.service.get_entries(&query)?;
    Ok(Json(Envelope::from_items(&entries)?))
}

/// POST /api/1/pages/single - update by id, or create under localeUrl
pub async fn save_page(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PageParams>,
) -> ApiResult<Response> {
    let input = EntryInput {
        active: parse_flag("active", params.active.as_deref())?,
        locale_url: params.locale_url,
        id: params.id,
        url: params.page_url,
        entry_type: params.entry_type,
        sku: params.sku,
        data: params.data,
    };
    let (entry, created) = state.service.save_entry(input, &principal.actor)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let envelope = Envelope::from_item(&entry)?.with_info("created", created);
    Ok((status, Json(envelope)).into_response())
}

/// DELETE /api/1/pages/single?id=a,b,c
pub async fn delete_pages(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Envelope>> {
    let ids = required("id", params.id)?;
    let deleted = state.service.delete_entries(&ids)?;
    info!(deleted, actor = %principal.actor, "pages deleted");
    Ok(Json(Envelope::success(Vec::new()).with_info("deletedPages", deleted)))
}

// ============================================================================
// Seller lookups
// ============================================================================

/// POST /api/1/:provider/product-data - every product of one locale
pub async fn scan_locale(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Query(params): Query<ScanParams>,
) -> ApiResult<Json<Envelope>> {
    let kind = provider(&segment)?;
    let url = required("url", params.url)?;
    let id_field = required("idField", params.id_field)?;

    let report = state.service.scan_locale(kind, &url, &id_field).await?;
    let mut envelope = Envelope::from_item(&report)?.with_info("provider", kind.block_key());
    if let serde_json::Value::Object(counts) = report.counts() {
        for (key, value) in counts {
            envelope = envelope.with_info(&key, value);
        }
    }
    Ok(Json(envelope))
}

/// GET /api/1/:provider/product-data/single - one entry by url or id
pub async fn scan_entry(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Query(params): Query<ScanParams>,
) -> ApiResult<Json<Envelope>> {
    let kind = provider(&segment)?;
    let id_field = required("idField", params.id_field)?;
    let query = EntryQuery {
        id: params.id,
        url: params.url,
        locale_url: None,
    };
    if query.is_empty() {
        return Err(ApiError::from(CatalogError::validation(
            "Either the url or the id parameter is required.",
        )));
    }

    let scan = state.service.scan_entry(kind, &query, &id_field).await?;
    Ok(Json(
        Envelope::from_item(&scan)?
            .with_info("provider", kind.block_key())
            .with_info("matchesCount", scan.matches_count()),
    ))
}

// ============================================================================
// Keys
// ============================================================================

/// POST /api/1/keys/create-key
pub async fn create_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Response> {
    let requested = parse_privilege(params.privilege.as_deref())?;
    let issued = state
        .auth
        .issue_key(&principal, requested, params.issued_for.as_deref())?;
    Ok((StatusCode::CREATED, Json(Envelope::from_item(&issued)?)).into_response())
}

/// POST /api/1/keys/deactivate-key
pub async fn deactivate_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Json<Envelope>> {
    let key = required("keyToDeactivate", params.key_to_deactivate)?;
    state.auth.deactivate_key(&principal, &key)?;
    Ok(Json(Envelope::success(vec![json!({
        "message": format!("Key {} successfully deactivated.", censor_key(key.trim())),
    })])))
}

/// GET /api/1/keys/key-info - admin only
pub async fn key_info(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<KeyParams>,
) -> ApiResult<Json<Envelope>> {
    let keys = state.auth.key_info(&principal, params.check_key.as_deref())?;
    Ok(Json(Envelope::from_items(&keys)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_numbers_are_validated() {
        assert_eq!(parse_flag("active", Some("TRUE")).unwrap(), Some(true));
        assert_eq!(parse_flag("active", Some("0")).unwrap(), Some(false));
        assert_eq!(parse_flag("active", None).unwrap(), None);
        assert_eq!(parse_flag("active", Some("maybe")).unwrap_err().status_code(), 422);
        assert_eq!(parse_number("limit", Some(" 20 ")).unwrap(), Some(20));
        assert!(parse_number("limit", Some("ten")).is_err());
    }

    #[test]
    fn test_download_format_defaults_to_xlsx() {
        assert_eq!(parse_format(None).unwrap(), ExportFormat::Xlsx);
        assert_eq!(parse_format(Some("CSV")).unwrap(), ExportFormat::Csv);
        assert_eq!(parse_format(Some("pdf")).unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn test_privilege_param_is_validated() {
        assert_eq!(parse_privilege(None).unwrap(), None);
        assert_eq!(parse_privilege(Some("readWrite")).unwrap(), Some(Privilege::ReadWrite));
        assert_eq!(parse_privilege(Some("admin")).unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn test_unknown_provider_is_not_found() {
        assert_eq!(provider("PS").unwrap(), ProviderKind::PriceSpider);
        assert_eq!(provider("acme").unwrap_err().status_code(), 404);
    }
}
