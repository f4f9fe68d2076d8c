use crate::{
    auth::{
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::{AppError, AppResult},
    models::{Claims, LoginReqDto, LoginResponse, TokenType},
    store,
    utils::dni,
};
use actix_web::{HttpRequest, HttpResponse, web};
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{debug, error, info, instrument};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

async fn store_refresh_token(
    conn: &mut MySqlConnection,
    user_id: u64,
    claims: &Claims,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user_id)
    .bind(&claims.jti)
    .bind(claims.exp as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Login with DNI and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Tokens and the signed-in user", body = LoginResponse),
        (status = 400, description = "DNI or password missing"),
        (status = 401, description = "Invalid credentials or inactive user")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(pool, config, body))]
pub async fn login(
    body: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    info!("Login request received");

    let dni = dni::normalize(&body.dni);
    if dni.is_empty() || body.password.is_empty() {
        return Err(AppError::validation("DNI and password are required"));
    }

    let mut conn = pool.acquire().await?;

    let credentials = match store::user::credentials_by_dni(&mut conn, &dni).await? {
        Some(c) => c,
        None => {
            info!("Invalid credentials: user not found");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
        }
    };

    if let Err(e) = verify_password(&body.password, &credentials.password) {
        info!(error = %e, user_id = credentials.id, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    }

    if credentials.active_since.is_none() {
        info!(user_id = credentials.id, "Login refused: user not active");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    }

    let user = store::user::find(&mut conn, credentials.id)
        .await?
        .ok_or_else(|| AppError::Internal("user vanished during login".into()))?;
    let role_ids: Vec<u8> = user.roles.iter().map(|r| r.id()).collect();

    debug!(user_id = user.id, "Generating tokens");
    let access_token = generate_access_token(
        user.id,
        credentials.name.clone(),
        role_ids.clone(),
        &config.jwt_secret,
        config.access_token_ttl,
    )?;
    let (refresh_token, refresh_claims) = generate_refresh_token(
        user.id,
        credentials.name,
        role_ids,
        &config.jwt_secret,
        config.refresh_token_ttl,
    )?;

    store_refresh_token(&mut conn, user.id, &refresh_claims)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to store refresh token"))?;

    // not fatal
    if let Err(e) = store::user::touch_login(&mut conn, user.id, config.now_local()).await {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = user.id, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token,
        refresh_token,
        user,
    }))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = Object, example = json!({
            "access_token": "eyJ...",
            "refresh_token": "eyJ..."
        })),
        (status = 401, description = "Missing, revoked or non-refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    let token = bearer(&req).ok_or(AppError::Unauthorized("No token"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid token"))?;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Refresh token required"));
    }

    let mut tx = pool.begin().await?;

    let record: Option<(u64, u64, bool)> =
        sqlx::query_as("SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE")
            .bind(&claims.jti)
            .fetch_optional(&mut *tx)
            .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => return Err(AppError::Unauthorized("Refresh token revoked")),
    };

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    let access = store::user::access_of(&mut tx, user_id).await?;
    if !access.active {
        tx.commit().await?;
        return Err(AppError::Unauthorized("User is not active"));
    }
    let role_ids: Vec<u8> = access.roles.iter().map(|r| r.id()).collect();

    let (new_refresh_token, new_claims) = generate_refresh_token(
        user_id,
        claims.sub.clone(),
        role_ids.clone(),
        &config.jwt_secret,
        config.refresh_token_ttl,
    )?;
    store_refresh_token(&mut tx, user_id, &new_claims).await?;

    let access_token = generate_access_token(
        user_id,
        claims.sub,
        role_ids,
        &config.jwt_secret,
        config.access_token_ttl,
    )?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "access_token": access_token,
        "refresh_token": new_refresh_token
    })))
}

/// Revoke a refresh token; always answers 204
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let claims = match bearer(&req).map(|t| verify_token(t, &config.jwt_secret)) {
        Some(Ok(c)) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    // idempotent: unknown jti still answers 204
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, user_id = claims.user_id, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test};

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/none".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            _ => None,
        })
        .unwrap()
    }

    fn lazy_pool() -> MySqlPool {
        sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/none")
            .unwrap()
    }

    #[actix_web::test]
    async fn logout_without_token_is_no_content() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config()))
                .app_data(web::Data::new(lazy_pool()))
                .route("/auth/logout", web::post().to(logout)),
        )
        .await;
        let req = test::TestRequest::post().uri("/auth/logout").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn refresh_with_access_token_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config()))
                .app_data(web::Data::new(lazy_pool()))
                .route("/auth/refresh", web::post().to(refresh_token)),
        )
        .await;
        let token = generate_access_token(1, "Ana".into(), vec![1], "test-secret", 60).unwrap();
        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn login_requires_dni_and_password() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config()))
                .app_data(web::Data::new(lazy_pool()))
                .route("/auth/login", web::post().to(login)),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(serde_json::json!({"dni": " ", "password": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
