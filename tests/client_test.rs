//! Tests for the HTTP gateway and QR login with mocked HTTP responses.

use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use pan_share::auth::CredentialAcquirer;
use pan_share::gateway::{ApiHost, ApiRequest, Gateway};
use pan_share::login::render_qr;
use pan_share::models::Cookies;
use pan_share::{Config, HttpGateway, PanError, QrLoginAcquirer};

fn config_for(server: &Server) -> Config {
    Config {
        drive_base_url: server.url(),
        share_base_url: format!("{}/share", server.url()),
        account_base_url: server.url(),
        login_base_url: server.url(),
        request_timeout_secs: 5,
        ..Config::default()
    }
}

fn cookies() -> Cookies {
    let mut cookies = Cookies::new();
    cookies.insert("__pus".to_string(), "a".to_string());
    cookies.insert("__puus".to_string(), "b".to_string());
    cookies
}

mod gateway {
    use super::*;

    #[tokio::test]
    async fn test_get_sends_common_params_and_cookies() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/task")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pr".into(), "ucpro".into()),
                Matcher::UrlEncoded("fr".into(), "pc".into()),
                Matcher::UrlEncoded("task_id".into(), "t1".into()),
            ]))
            .match_header("cookie", "__pus=a; __puus=b")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"status": 200, "code": 0, "data": {"status": 1}}).to_string())
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "task").query("task_id", "t1");
        let value = gateway.execute(&request, Some(&cookies())).await.unwrap();

        assert_eq!(value["data"]["status"], 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_json_body_to_share_host() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/share/share/sharepage/token")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({"pwd_id": "abc", "passcode": ""})))
            .with_status(200)
            .with_body(json!({"code": 0, "data": {"stoken": "st"}}).to_string())
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::post(
            ApiHost::Share,
            "share/sharepage/token",
            json!({"pwd_id": "abc", "passcode": ""}),
        )
        .unauthenticated();
        let value = gateway.execute(&request, None).await.unwrap();

        assert_eq!(value["data"]["stoken"], "st");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_status_is_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/file/sort")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "file/sort");
        let err = gateway.execute(&request, Some(&cookies())).await.unwrap_err();

        assert!(matches!(err, PanError::Auth(_)));
    }

    #[tokio::test]
    async fn test_login_required_code_is_auth_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/file/sort")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"code": 31001, "message": "require login [guest]"}).to_string())
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "file/sort");
        let err = gateway.execute(&request, Some(&cookies())).await.unwrap_err();

        assert!(matches!(err, PanError::Auth(message) if message.contains("require login")));
    }

    #[tokio::test]
    async fn test_application_code_is_remote_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/share/share/sharepage/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"code": 41008, "message": "提取码错误"}).to_string())
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::post(ApiHost::Share, "share/sharepage/token", json!({}));
        let err = gateway.execute(&request, None).await.unwrap_err();

        match err {
            PanError::Remote { code, message } => {
                assert_eq!(code, 41008);
                assert_eq!(message, "提取码错误");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_remote_error_with_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/task")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "task");
        let err = gateway.execute(&request, None).await.unwrap_err();

        assert!(matches!(err, PanError::Remote { code: 502, .. }));
    }

    #[tokio::test]
    async fn test_non_json_body_is_unexpected_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/task")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let gateway = HttpGateway::new(&config_for(&server)).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "task");
        let err = gateway.execute(&request, None).await.unwrap_err();

        assert!(matches!(err, PanError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let config = Config {
            drive_base_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 2,
            ..Config::default()
        };

        let gateway = HttpGateway::new(&config).unwrap();
        let request = ApiRequest::get(ApiHost::Drive, "task");
        let err = gateway.execute(&request, None).await.unwrap_err();

        assert!(err.is_transient());
    }
}

mod qr_login {
    use super::*;

    async fn mock_token(server: &mut Server) -> mockito::Mock {
        server
            .mock("GET", "/cas/ajax/getTokenForQrcodeLogin")
            .match_query(Matcher::UrlEncoded("client_id".into(), "532".into()))
            .with_status(200)
            .with_body(
                json!({"status": 2000000, "message": "ok", "data": {"members": {"token": "qrtok"}}})
                    .to_string(),
            )
            .create_async()
            .await
    }

    async fn mock_ticket_status(server: &mut Server, body: serde_json::Value) -> mockito::Mock {
        server
            .mock("GET", "/cas/ajax/getServiceTicketByQrcodeToken")
            .match_query(Matcher::UrlEncoded("token".into(), "qrtok".into()))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_confirmed_scan_yields_cookies() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _ticket = mock_ticket_status(
            &mut server,
            json!({"status": 2000000, "data": {"members": {"service_ticket": "ST-1"}}}),
        )
        .await;
        let exchange = server
            .mock("GET", "/account/info")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("st".into(), "ST-1".into()),
                Matcher::UrlEncoded("lw".into(), "scan".into()),
            ]))
            .with_status(200)
            .with_header("set-cookie", "__pus=p1; Path=/")
            .with_header("set-cookie", "__puus=p2; Path=/")
            .with_body(json!({"success": true, "data": {"nickname": "alice"}}).to_string())
            .create_async()
            .await;

        let acquirer = QrLoginAcquirer::new(&config_for(&server))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let cookies = acquirer
            .acquire_via_qr(Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(cookies.get("__pus").map(String::as_str), Some("p1"));
        assert_eq!(cookies.get("__puus").map(String::as_str), Some("p2"));
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_qr_code_is_acquire_timeout() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _ticket = mock_ticket_status(&mut server, json!({"status": 50004002})).await;

        let acquirer = QrLoginAcquirer::new(&config_for(&server))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let err = acquirer
            .acquire_via_qr(Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, PanError::AcquireTimeout(_)));
    }

    #[tokio::test]
    async fn test_unscanned_qr_code_times_out() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _ticket = mock_ticket_status(&mut server, json!({"status": 50004001})).await;

        let acquirer = QrLoginAcquirer::new(&config_for(&server))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let err = acquirer
            .acquire_via_qr(Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, PanError::AcquireTimeout(d) if d == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_manual_login_is_abandoned_when_non_interactive() {
        let acquirer = QrLoginAcquirer::new(&Config::default())
            .unwrap()
            .non_interactive();

        let err = acquirer.acquire_manually().await.unwrap_err();

        assert!(matches!(err, PanError::AcquireAbandoned(_)));
    }

    #[test]
    fn test_render_qr() {
        let rendered = render_qr("https://su.quark.cn/4_eMHBJ?token=qrtok").unwrap();
        assert!(rendered.lines().count() > 10);
    }
}

mod error_handling {
    use pan_share::{ErrorKind, PanError};

    #[test]
    fn test_error_display() {
        let err = PanError::Remote {
            code: 41004,
            message: "share expired".to_string(),
        };

        let display = format!("{}", err);
        assert!(display.contains("41004"));
        assert!(display.contains("share expired"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(PanError::Parse("x".into()).kind(), ErrorKind::Parse);
        assert_eq!(
            PanError::UnexpectedResponse("x".into()).kind(),
            ErrorKind::Remote
        );
        assert_eq!(ErrorKind::ShareAuth.to_string(), "ShareAuthError");
        assert!(PanError::Network("reset".into()).is_transient());
        assert!(!PanError::Auth("x".into()).is_transient());
    }
}
