use storewatch::probe::parse::{parse_transcript, Flavor};
use storewatch::probe::{interpret_transcript, FULL_LOSS_ERROR};

const LINUX_OK: &str = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.
64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=4.12 ms
64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=5.88 ms

--- 10.0.0.1 ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 4.120/5.000/5.880/0.880 ms
";

const LINUX_LOSS: &str = "PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.

--- 10.0.0.2 ping statistics ---
2 packets transmitted, 0 received, 100% packet loss, time 1015ms
";

const MACOS_PARTIAL: &str = "--- 10.0.0.3 ping statistics ---
4 packets transmitted, 3 packets received, 25.0% packet loss
round-trip min/avg/max/stddev = 1.101/2.202/3.303/0.900 ms
";

const LINUX_NEAR_TOTAL_LOSS: &str = "--- 10.0.0.4 ping statistics ---
200 packets transmitted, 1 received, 99.5% packet loss, time 199000ms
rtt min/avg/max/mdev = 4.000/4.000/4.000/0.000 ms
";

const WINDOWS_EN_OK: &str = "
Pinging 8.8.8.8 with 32 bytes of data:
Reply from 8.8.8.8: bytes=32 time=12ms TTL=117
Reply from 8.8.8.8: bytes=32 time=11ms TTL=117
Reply from 8.8.8.8: bytes=32 time=14ms TTL=117
Reply from 8.8.8.8: bytes=32 time=12ms TTL=117

Ping statistics for 8.8.8.8:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 11ms, Maximum = 14ms, Average = 12ms
";

const WINDOWS_PT_OK: &str = "
Disparando 192.168.10.1 com 32 bytes de dados:
Resposta de 192.168.10.1: bytes=32 tempo=2ms TTL=64
Resposta de 192.168.10.1: bytes=32 tempo=1ms TTL=64
Resposta de 192.168.10.1: bytes=32 tempo=3ms TTL=64
Resposta de 192.168.10.1: bytes=32 tempo=2ms TTL=64

Estatísticas do Ping para 192.168.10.1:
    Pacotes: Enviados = 4, Recebidos = 4, Perdidos = 0 (0% de perda),
Aproximar um número redondo de vezes em milissegundos:
    Mínimo = 1ms, Máximo = 3ms, Média = 2ms
";

const WINDOWS_PT_TIMEOUT: &str = "
Esgotado o tempo limite do pedido.
Esgotado o tempo limite do pedido.

Estatísticas do Ping para 10.0.0.9:
    Pacotes: Enviados = 2, Recebidos = 0, Perdidos = 2 (100% de perda),
";

#[test]
fn linux_success_has_ordered_timings() {
    let r = interpret_transcript("10.0.0.1", Flavor::Unix, Some(0), LINUX_OK, "");
    assert!(r.success());
    assert_eq!(r.packet_loss_percent(), 0);
    assert!(r.error().is_none());
    let (min, avg, max) = (
        r.min_time_ms().unwrap(),
        r.avg_time_ms().unwrap(),
        r.max_time_ms().unwrap(),
    );
    assert!(min <= avg && avg <= max);
    assert_eq!(avg, 5.0);
}

#[test]
fn linux_full_loss_is_offline_without_timings() {
    let r = interpret_transcript("10.0.0.2", Flavor::Unix, Some(1), LINUX_LOSS, "");
    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert!(r.min_time_ms().is_none());
    assert!(r.avg_time_ms().is_none());
    assert!(r.max_time_ms().is_none());
    assert!(r.error().unwrap().contains("code 1"));
}

#[test]
fn bsd_summary_with_fractional_loss() {
    let stats = parse_transcript(Flavor::Unix, MACOS_PARTIAL);
    assert_eq!(stats.packet_loss_percent, 25);
    let rtt = stats.round_trip.unwrap();
    assert_eq!(rtt.min_ms, 1.101);
    assert_eq!(rtt.avg_ms, 2.202);
    assert_eq!(rtt.max_ms, 3.303);
}

#[test]
fn windows_english_summary() {
    let r = interpret_transcript("8.8.8.8", Flavor::Windows, Some(0), WINDOWS_EN_OK, "");
    assert!(r.success());
    assert_eq!(r.packet_loss_percent(), 0);
    assert_eq!(r.min_time_ms(), Some(11.0));
    assert_eq!(r.avg_time_ms(), Some(12.0));
    assert_eq!(r.max_time_ms(), Some(14.0));
}

#[test]
fn windows_portuguese_summary() {
    let r = interpret_transcript("192.168.10.1", Flavor::Windows, Some(0), WINDOWS_PT_OK, "");
    assert!(r.success());
    assert_eq!(r.min_time_ms(), Some(1.0));
    assert_eq!(r.avg_time_ms(), Some(2.0));
    assert_eq!(r.max_time_ms(), Some(3.0));
}

#[test]
fn zero_exit_with_full_loss_uses_timeout_line() {
    let r = interpret_transcript("10.0.0.9", Flavor::Windows, Some(0), WINDOWS_PT_TIMEOUT, "");
    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert_eq!(r.error(), Some("Esgotado o tempo limite do pedido."));
    assert!(r.avg_time_ms().is_none());
}

#[test]
fn zero_exit_with_unparsable_output_is_full_loss() {
    let r = interpret_transcript("10.0.0.9", Flavor::Unix, Some(0), "something odd\n", "");
    assert!(!r.success());
    assert_eq!(r.packet_loss_percent(), 100);
    assert_eq!(r.error(), Some(FULL_LOSS_ERROR));
}

#[test]
fn nonzero_exit_reports_stderr() {
    let r = interpret_transcript(
        "nosuchhost",
        Flavor::Unix,
        Some(2),
        "",
        "ping: nosuchhost: Name or service not known\n",
    );
    assert!(!r.success());
    let err = r.error().unwrap();
    assert!(err.contains("code 2"));
    assert!(err.contains("Name or service not known"));
}

#[test]
fn signal_exit_is_a_failure() {
    let r = interpret_transcript("10.0.0.1", Flavor::Unix, None, LINUX_OK, "");
    assert!(!r.success());
    assert!(r.error().unwrap().contains("signal"));
}

#[test]
fn near_total_loss_stays_reachable() {
    let r = interpret_transcript("10.0.0.4", Flavor::Unix, Some(0), LINUX_NEAR_TOTAL_LOSS, "");
    assert!(r.success(), "{:?}", r.error());
    assert_eq!(r.packet_loss_percent(), 99);
    assert_eq!(r.avg_time_ms(), Some(4.0));
    assert!(r.error().is_none());
}
