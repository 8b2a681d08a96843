use brine::crypto::{DecodePublicKey, RsaPublicKey};
use brine::logging;
use clap::{App, Arg};
use mooring::config::BrokerConfig;
use mooring::endpoint::Endpoint;
use mooring::session::{Event, SessionState};
use mooring::trust::PinnedVerifier;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    let matches = App::new("Broker Probe")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Dials a broker with a pinned identity and reports the session outcome.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the broker config file")
                .required(true),
        )
        .arg(
            Arg::with_name("PAYLOAD")
                .help("Payload sent once the session is up")
                .required(false),
        )
        .get_matches();

    let config = BrokerConfig::load(matches.value_of("CONFIG_FILE").unwrap());
    let payload = matches.value_of("PAYLOAD").unwrap_or("ping").as_bytes().to_vec();

    let logger = logging::init();

    // The probe runs in pinned-key mode: `ca` carries the broker's leaf
    // public key as a PEM PUBLIC KEY block.
    let pin = config
        .ca
        .as_ref()
        .expect("Probe requires the broker public key in `ca`");
    let public_key =
        RsaPublicKey::from_public_key_pem(pin).expect("Error parsing the pinned broker public key");
    let verifier = Box::new(PinnedVerifier::new(config.host.clone(), public_key));

    let signer = Box::new(config.signer().expect("Probe requires a private key in `key`"));
    let client_cert = config.client_cert_der().expect("Error parsing the client certificate");

    logging::info!(logger, "probing broker"; "address" => config.address());

    let mut endpoint = Endpoint::connect(
        &config.address(),
        config.host.clone(),
        client_cert,
        config.validity_check_date.clone(),
        verifier,
        signer,
        &logger,
    )
    .expect("Error opening the broker connection");

    let mut sent = false;

    loop {
        endpoint.sync(Instant::now());

        if endpoint.state() == SessionState::Established && !sent {
            logging::info!(logger, "session established, sending payload"; "size" => payload.len());
            endpoint.write(&payload).expect("Error writing the probe payload");
            sent = true;
        }

        while let Some(event) = endpoint.poll_event() {
            match event {
                Event::Data(bytes) => {
                    logging::info!(logger, "broker data"; "size" => bytes.len());
                    endpoint.end();
                }
                Event::Writable => logging::debug!(logger, "write settled"),
                Event::WriteError(fault) => {
                    logging::error!(logger, "write failed"; "fault" => ?fault);
                }
                Event::End => logging::info!(logger, "read side ended"),
                Event::Error(fault) => {
                    logging::error!(logger, "session error"; "fault" => ?fault);
                }
                Event::Close => {
                    logging::info!(logger, "session closed");
                    return;
                }
            }
        }

        thread::sleep(Duration::from_millis(5));
    }
}
