use crate::{
    api::{audit, clock, incident, schedule, user},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::anyhow;
use std::sync::Arc;

type Limiter = Governor<PeerIpKeyExtractor, NoOpMiddleware>;

fn build_limiter(requests_per_min: u32) -> anyhow::Result<Limiter> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        60_000 / requests_per_min as u64
    };
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit of {requests_per_min} requests per minute"))?;
    Ok(Governor::new(&cfg))
}

/// Per-IP limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    login: Arc<Limiter>,
    refresh: Arc<Limiter>,
    protected: Arc<Limiter>,
}

impl Limiters {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            login: Arc::new(build_limiter(config.rate_login_per_min)?),
            refresh: Arc::new(build_limiter(config.rate_refresh_per_min)?),
            protected: Arc::new(build_limiter(config.rate_protected_per_min)?),
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, api_prefix: &str, limiters: &Limiters) {
    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(limiters.protected.clone())
            .service(
                web::scope("/users")
                    // /users
                    .service(
                        web::resource("")
                            .route(web::get().to(user::list_users))
                            .route(web::post().to(user::create_user)),
                    )
                    // fixed segments before /{id}
                    .service(web::resource("/me").route(web::get().to(user::me)))
                    .service(
                        web::resource("/password/check")
                            .route(web::post().to(user::check_password)),
                    )
                    // /users/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(user::get_user))
                            .route(web::put().to(user::update_user)),
                    )
                    .service(
                        web::resource("/{id}/password").route(web::put().to(user::change_password)),
                    )
                    // /users/{id}/schedules
                    .service(
                        web::resource("/{id}/schedules")
                            .route(web::post().to(schedule::assign_schedules)),
                    )
                    .service(
                        web::resource("/{id}/schedules/today")
                            .route(web::get().to(schedule::unassigned_today)),
                    )
                    .service(
                        web::resource("/{id}/schedules/closest")
                            .route(web::get().to(schedule::closest_schedule)),
                    )
                    // /users/{id}/clock
                    .service(web::resource("/{id}/clock").route(web::get().to(clock::entries_on)))
                    .service(
                        web::resource("/{id}/clock/check-out").route(web::put().to(clock::check_out)),
                    )
                    .service(
                        web::resource("/{id}/clock/open").route(web::get().to(clock::open_entry)),
                    )
                    .service(
                        web::resource("/{id}/clock/latest")
                            .route(web::get().to(clock::latest_entries)),
                    )
                    .service(
                        web::resource("/{id}/clock/range")
                            .route(web::get().to(clock::entries_between)),
                    )
                    .service(
                        web::resource("/{id}/clock/without-incident")
                            .route(web::get().to(clock::entries_without_incident)),
                    )
                    .service(
                        web::resource("/{id}/clock/summary").route(web::get().to(clock::summary)),
                    ),
            )
            .service(web::resource("/roles/{id}/users").route(web::get().to(user::users_with_role)))
            .service(
                web::resource("/schedules")
                    .route(web::get().to(schedule::list_schedules))
                    .route(web::post().to(schedule::create_schedule)),
            )
            .service(web::resource("/clock").route(web::post().to(clock::register_entry)))
            .service(
                web::scope("/incidents")
                    .service(web::resource("").route(web::post().to(incident::create_incident)))
                    .service(
                        web::resource("/search").route(web::post().to(incident::search_incidents)),
                    )
                    .service(
                        web::resource("/process")
                            .route(web::post().to(incident::process_incidents)),
                    )
                    .service(
                        web::resource("/{id}/resubmit")
                            .route(web::put().to(incident::resubmit_incident)),
                    ),
            )
            .service(web::resource("/audit").route(web::get().to(audit::list_audit))),
    );
}

// LOGIN (DNI + password)
//  ├─ access_token (ACCESS_TOKEN_TTL)
//  └─ refresh_token (REFRESH_TOKEN_TTL, one use)

// API REQUEST
//  └─ Authorization: Bearer access_token, roles re-read per request

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{TestRequest, call_service, init_service};
    use actix_web::{App, http::StatusCode};

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/none".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(build_limiter(0).is_err());
        assert!(build_limiter(60).is_ok());
    }

    #[actix_web::test]
    async fn protected_routes_need_a_token() {
        let config = config();
        let limiters = Limiters::from_config(&config).unwrap();
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/none")
            .unwrap();
        let prefix = config.api_prefix.clone();

        let app = init_service(
            App::new()
                .app_data(web::Data::new(pool))
                .app_data(web::Data::new(config))
                .configure(|cfg| configure(cfg, &prefix, &limiters)),
        )
        .await;

        for uri in ["/api/v1/users/me", "/api/v1/schedules", "/api/v1/audit"] {
            let req = TestRequest::get()
                .uri(uri)
                .peer_addr("127.0.0.1:40000".parse().unwrap())
                .to_request();
            let resp = call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
