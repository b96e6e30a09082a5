use distri_gateway::config::GatewayConfig;
use distri_gateway::monitoring::MemorySink;
use distri_gateway::proxy::GatewayServer;
use distri_gateway::Gateway;
use hyper::{Body, Client, Request, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_gateway(toml: &str) -> SocketAddr {
    let config = GatewayConfig::from_toml_str(toml).unwrap(); // OK in tests - valid config
    let gateway = Arc::new(Gateway::new(&config, Arc::new(MemorySink::default())).unwrap());
    let server = GatewayServer::bind(gateway, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

async fn backends(n: usize, delay: Duration) -> Vec<MockServer> {
    let mut servers = Vec::with_capacity(n);
    for _ in 0..n {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .mount(&server)
            .await;
        servers.push(server);
    }
    servers
}

fn pool_config(policy: &str, servers: &[MockServer], weights: &[u32]) -> String {
    let instances: Vec<String> = servers
        .iter()
        .zip(weights)
        .map(|(s, w)| {
            format!(
                "{{ host = \"127.0.0.1\", port = {}, weight = {} }}",
                s.address().port(),
                w
            )
        })
        .collect();
    format!(
        r#"
[services.teachers]
load_balancing = "{}"
instances = [{}]

[[routes]]
id = "teachers"
uri = "lb://teachers"
"#,
        policy,
        instances.join(", ")
    )
}

async fn fire(addr: SocketAddr, count: usize) {
    let client = Client::new();
    let tasks: Vec<_> = (0..count)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let req = Request::builder()
                    .uri(format!("http://{}/api/v1/teachers/{}", addr, i))
                    .body(Body::empty())
                    .unwrap();
                let resp = client.request(req).await.unwrap();
                assert_eq!(resp.status(), StatusCode::OK);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
}

async fn counts(servers: &[MockServer]) -> Vec<usize> {
    let mut counts = Vec::with_capacity(servers.len());
    for server in servers {
        counts.push(server.received_requests().await.map_or(0, |r| r.len()));
    }
    counts
}

/// Selection spread observed through the gateway
mod load_balancer_edge_tests {
    use super::*;

    #[tokio::test]
    async fn test_round_robin_splits_concurrent_requests_evenly() {
        let servers = backends(3, Duration::ZERO).await;
        let addr = start_gateway(&pool_config("round_robin", &servers, &[1, 1, 1])).await;

        fire(addr, 100).await;

        let counts = counts(&servers).await;
        assert_eq!(counts.iter().sum::<usize>(), 100);
        for count in counts {
            assert!((33..=34).contains(&count), "uneven split: {}", count);
        }
    }

    #[tokio::test]
    async fn test_zero_weight_instance_is_never_picked() {
        let servers = backends(2, Duration::ZERO).await;
        let addr = start_gateway(&pool_config("weighted_random", &servers, &[1, 0])).await;

        fire(addr, 30).await;

        assert_eq!(counts(&servers).await, vec![30, 0]);
    }

    #[tokio::test]
    async fn test_least_connections_spreads_slow_requests() {
        let servers = backends(2, Duration::from_millis(200)).await;
        let addr = start_gateway(&pool_config("least_connections", &servers, &[1, 1])).await;

        fire(addr, 20).await;

        let counts = counts(&servers).await;
        assert_eq!(counts.iter().sum::<usize>(), 20);
        assert!(counts.iter().all(|c| *c >= 8), "unbalanced: {:?}", counts);
    }
}
