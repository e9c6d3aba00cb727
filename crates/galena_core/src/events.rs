use std::sync::mpsc;

/// Typed one-way channel used for engine -> session-layer notifications
/// (block commits, policy denials, reload hints).
pub struct EventSender<T> {
    tx: mpsc::Sender<T>,
}

pub struct EventReceiver<T> {
    rx: mpsc::Receiver<T>,
}

pub fn channel<T>() -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    pub fn send(&self, event: T) -> Result<(), mpsc::SendError<T>> {
        self.tx.send(event)
    }

    /// Send without caring whether anyone is still listening. The engine
    /// must keep committing even after the session layer shuts down.
    pub fn send_lossy(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

impl<T> EventReceiver<T> {
    pub fn recv(&self) -> Result<T, mpsc::RecvError> {
        self.rx.recv()
    }

    pub fn try_recv(&self) -> Result<T, mpsc::TryRecvError> {
        self.rx.try_recv()
    }

    pub fn try_iter(&self) -> mpsc::TryIter<'_, T> {
        self.rx.try_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::channel;

    #[test]
    fn events_arrive_in_send_order() {
        let (tx, rx) = channel();
        for n in 0..5 {
            tx.send(n).expect("receiver alive");
        }
        let received: Vec<i32> = rx.try_iter().collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn lossy_send_ignores_a_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send_lossy(42);
    }
}
