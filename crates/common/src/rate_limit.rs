use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
};
use dashmap::DashMap;
use std::{
    future::Future,
    net::IpAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};

/// Token bucket rate limiter, applied per client IP on the external HTTP surface.
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
}

struct RateLimitState {
    buckets: DashMap<IpAddr, TokenBucket>,
    requests_per_second: u64,
    burst_size: u32,
}

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl RateLimitLayer {
    pub fn new(requests_per_second: u64, burst_size: u32) -> Self {
        Self {
            state: Arc::new(RateLimitState {
                buckets: DashMap::new(),
                requests_per_second,
                burst_size,
            }),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: Arc<RateLimitState>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let client_ip = extract_client_ip(&req);

        let allowed = if let Some(ip) = client_ip {
            self.check_rate_limit(ip)
        } else {
            tracing::warn!("Could not determine client IP for rate limiting");
            true
        };

        if !allowed {
            let response = Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header("Retry-After", "1")
                .body(Body::from("Rate limit exceeded"))
                .unwrap();

            return Box::pin(async move { Ok(response) });
        }

        let future = self.inner.call(req);
        Box::pin(async move { future.await })
    }
}

impl<S> RateLimitService<S> {
    fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let rps = self.state.requests_per_second as f64;
        let burst = self.state.burst_size as f64;

        let mut bucket = self.state.buckets.entry(ip).or_insert_with(|| TokenBucket {
            tokens: burst,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update);
        let new_tokens = elapsed.as_secs_f64() * rps;
        bucket.tokens = (bucket.tokens + new_tokens).min(burst);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn extract_client_ip(req: &Request<Body>) -> Option<IpAddr> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && let Ok(ip) = first_ip.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && let Ok(ip) = value.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    None
}

/// Periodically clean up stale rate limit buckets to bound memory.
pub fn spawn_cleanup_task(layer: RateLimitLayer) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let now = Instant::now();
            let stale_threshold = Duration::from_secs(600);

            layer
                .state
                .buckets
                .retain(|_, bucket| now.duration_since(bucket.last_update) < stale_threshold);

            tracing::debug!(buckets = layer.state.buckets.len(), "rate limit cleanup");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_test_service() -> RateLimitService<()> {
        let layer = RateLimitLayer::new(10, 5);
        RateLimitService {
            inner: (),
            state: layer.state,
        }
    }

    #[test]
    fn allows_burst() {
        let service = make_test_service();
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 1).into();
        for i in 0..5 {
            assert!(service.check_rate_limit(ip), "request {i} should be allowed");
        }
    }

    #[test]
    fn blocks_after_burst() {
        let service = make_test_service();
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 2).into();
        for _ in 0..5 {
            service.check_rate_limit(ip);
        }
        assert!(!service.check_rate_limit(ip));
    }

    #[test]
    fn different_ips_independent() {
        let service = make_test_service();
        let ip1: IpAddr = Ipv4Addr::new(192, 168, 1, 1).into();
        let ip2: IpAddr = Ipv4Addr::new(192, 168, 1, 2).into();
        for _ in 0..5 {
            service.check_rate_limit(ip1);
        }
        for i in 0..5 {
            assert!(service.check_rate_limit(ip2), "ip2 request {i} should be allowed");
        }
        assert!(!service.check_rate_limit(ip1));
    }

    #[test]
    fn tokens_refill() {
        let layer = RateLimitLayer::new(1000, 1);
        let service = RateLimitService {
            inner: (),
            state: layer.state,
        };
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 1).into();
        assert!(service.check_rate_limit(ip));
        assert!(!service.check_rate_limit(ip));
        std::thread::sleep(Duration::from_millis(2));
        assert!(service.check_rate_limit(ip));
    }

    #[test]
    fn extract_ip_prefers_forwarded_for() {
        let req = Request::builder()
            .header("x-forwarded-for", "1.1.1.1")
            .header("x-real-ip", "2.2.2.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), Some(Ipv4Addr::new(1, 1, 1, 1).into()));
    }

    #[test]
    fn extract_ip_none_without_headers() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&req), None);
    }
}
