use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::audit::{AuditEntity, AuditEntry, AuditKind};
use crate::model::role::Role;
use crate::store;
use crate::store::audit::AuditFilter;
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuditQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// 1 user, 2 incident, 3 clock entry
    pub entity: Option<u8>,
    pub entity_id: Option<u64>,
    pub kind: Option<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct AuditListResponse {
    pub data: Vec<AuditEntry>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 57)]
    pub total: i64,
}

impl AuditQuery {
    fn filter(&self) -> AppResult<AuditFilter> {
        let entity = self
            .entity
            .map(|id| {
                AuditEntity::from_id(id)
                    .ok_or_else(|| AppError::validation(format!("Unknown audit entity {id}")))
            })
            .transpose()?;
        let kind = self
            .kind
            .map(|id| {
                AuditKind::from_id(id)
                    .ok_or_else(|| AppError::validation(format!("Unknown audit kind {id}")))
            })
            .transpose()?;

        Ok(AuditFilter {
            entity: entity.map(u8::from),
            entity_id: self.entity_id,
            kind: kind.map(u8::from),
        })
    }
}

/// Page, clamped page size and row offset.
fn page_window(page: Option<u32>, per_page: Option<u32>) -> (u32, u32, u64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    let offset = (u64::from(page) - 1) * u64::from(per_page);
    (page, per_page, offset)
}

#[utoipa::path(
    get,
    path = "/api/v1/audit",
    params(
        ("page", Query, description = "Page number"),
        ("per_page", Query, description = "Items per page, at most 100"),
        ("entity", Query, description = "1 user, 2 incident, 3 clock entry"),
        ("entity_id", Query, description = "Id of the audited record"),
        ("kind", Query, description = "Audit kind id")
    ),
    responses(
        (status = 200, description = "Audit entries, newest first", body = AuditListResponse),
        (status = 400, description = "Unknown entity or kind"),
        (status = 403, description = "Forbidden")
    ),
    tag = "Audit",
    security(("bearer_auth" = []))
)]
pub async fn list_audit(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AuditQuery>,
) -> AppResult<HttpResponse> {
    auth.require_any(&[Role::Admin, Role::Inspector])?;
    let filter = query.filter()?;

    let (page, per_page, offset) = page_window(query.page, query.per_page);
    debug!(?filter, page, per_page, offset, "Fetching audit entries");

    let mut conn = pool.acquire().await?;
    let (data, total) =
        store::audit::list(&mut conn, &filter, u64::from(per_page), offset).await?;

    Ok(HttpResponse::Ok().json(AuditListResponse {
        data,
        page,
        per_page,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(entity: Option<u8>, kind: Option<u8>) -> AuditQuery {
        AuditQuery {
            page: None,
            per_page: None,
            entity,
            entity_id: Some(4),
            kind,
        }
    }

    #[test]
    fn known_ids_pass_through() {
        let filter = query(Some(2), Some(5)).filter().unwrap();
        assert_eq!(filter.entity, Some(2));
        assert_eq!(filter.kind, Some(5));
        assert_eq!(filter.entity_id, Some(4));
    }

    #[test]
    fn page_window_defaults_and_clamps() {
        assert_eq!(page_window(None, None), (1, 20, 0));
        assert_eq!(page_window(Some(0), Some(500)), (1, 100, 0));
        assert_eq!(page_window(Some(3), Some(10)), (3, 10, 20));
    }

    #[test]
    fn far_pages_do_not_overflow_the_offset() {
        let (_, _, offset) = page_window(Some(50_000_000), Some(100));
        assert_eq!(offset, 4_999_999_900);
        let (_, _, offset) = page_window(Some(u32::MAX), Some(100));
        assert_eq!(offset, (u64::from(u32::MAX) - 1) * 100);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(query(Some(9), None).filter().is_err());
        assert!(query(None, Some(0)).filter().is_err());
    }
}
