use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use croak::req::Request;
use croak::{Config, ContentFormat, Endpoint, NewResource};

fn main() {
  simple_logger::init_with_level(log::Level::Info).unwrap();

  let server = Endpoint::init(Config::server(Ipv4Addr::LOCALHOST.into()).port(5683)).unwrap();
  let temp = server.add_resource(NewResource::new("sensors/temp").media_type(ContentFormat::Text)
                                                                 .max_age(5)
                                                                 .value("20"))
                   .unwrap();
  log::info!("serving {} on {:?}", temp.uri(), server.local_addr());

  let client = Endpoint::init(Config::client()).unwrap();
  client.on_response(|resp| {
          log::info!("{} from {}: {}",
                     croak::resp::code::dotted(resp.code),
                     resp.from,
                     resp.payload_str().unwrap_or("<binary>"))
        });

  let session = client.new_client_session(Ipv4Addr::LOCALHOST.into(), None, None, None)
                      .unwrap();

  for reading in 21..24 {
    session.send_request(&Request::get("sensors/temp")).unwrap();
    client.wait_events(Duration::from_secs(1));

    temp.set_value(reading.to_string()).unwrap();
    thread::sleep(Duration::from_millis(500));
  }
}
