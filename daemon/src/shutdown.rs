use tokio::sync::watch;

/// The daemon's stop flag. It latches: once triggered, every clone (including ones made later)
/// sees it, and `recv` keeps returning straight away.
#[derive(Clone)]
pub struct Shutdown {
    flag: watch::Sender<bool>,
    stopped: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (flag, stopped) = watch::channel(false);
        Self { flag, stopped }
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub async fn recv(&mut self) {
        // We hold a sender ourselves, so the channel can't close under us.
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }
}
