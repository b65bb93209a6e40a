use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::email::Mailer;
use crate::transport::Transport;

#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,
    pub mailer: Option<Arc<Mailer>>,
    pub transport: Arc<dyn Transport>,
}

impl ServerState {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let dispatcher = Arc::new(Dispatcher::from_config(config, transport.clone()));
        let mailer = config.email.as_ref().map(|email| Arc::new(Mailer::new(email)));

        ServerState {
            dispatcher,
            mailer,
            transport,
        }
    }
}
