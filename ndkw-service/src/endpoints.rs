//! Static endpoint table.
//!
//! Every endpoint is registered once under a unique lower-case name and
//! tagged with its argument shape, or as a content endpoint whose reply is
//! followed by a raw byte stream. Lookup is case-insensitive.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use ndkw_core::EventKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::controller::{ContentBody, Controller, StartRecordingArgs};
use crate::error::DispatchError;

/// What a handler produced.
pub enum Reply {
    Empty,
    Value(Value),
    Content(ContentBody),
}

pub type HandlerFuture = BoxFuture<'static, Result<Reply, DispatchError>>;
pub type ContentFuture = BoxFuture<'static, Result<ContentBody, DispatchError>>;

#[derive(Clone, Copy)]
pub enum Handler {
    NoArg(fn(Arc<Controller>) -> HandlerFuture),
    OneArg(fn(Arc<Controller>, Value) -> HandlerFuture),
    /// Takes no argument; the reply announces a length and streams the body.
    Content(fn(Arc<Controller>) -> ContentFuture),
}

pub struct Endpoint {
    pub name: &'static str,
    pub handler: Handler,
}

pub static ENDPOINTS: &[Endpoint] = &[
    Endpoint { name: "start-recording", handler: Handler::OneArg(start_recording) },
    Endpoint { name: "stop-recording", handler: Handler::NoArg(stop_recording) },
    Endpoint { name: "get-status", handler: Handler::NoArg(get_status) },
    Endpoint { name: "get-recording-devices", handler: Handler::NoArg(get_recording_devices) },
    Endpoint { name: "get-max-duration", handler: Handler::NoArg(get_max_duration) },
    Endpoint { name: "get-devices", handler: Handler::NoArg(get_devices) },
    Endpoint { name: "find-device", handler: Handler::OneArg(find_device) },
    Endpoint { name: "save-as-ndkw", handler: Handler::Content(save_as_ndkw) },
    Endpoint { name: "add-to-queue", handler: Handler::NoArg(add_to_queue) },
    Endpoint { name: "delete-from-queue", handler: Handler::OneArg(delete_from_queue) },
    Endpoint { name: "get-queue", handler: Handler::NoArg(get_queue) },
    Endpoint { name: "event-status-changed", handler: Handler::NoArg(event_status_changed) },
    Endpoint { name: "event-devices-changed", handler: Handler::NoArg(event_devices_changed) },
    Endpoint { name: "event-queue-changed", handler: Handler::NoArg(event_queue_changed) },
    Endpoint { name: "wait-until-start", handler: Handler::NoArg(wait_until_start) },
    Endpoint { name: "wait-until-stop", handler: Handler::NoArg(wait_until_stop) },
];

pub fn lookup(name: &str) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}

impl Endpoint {
    /// Run the handler with the raw argument text of the request.
    pub fn call(&self, controller: Arc<Controller>, argument: Option<&str>) -> HandlerFuture {
        let argument = argument.map(str::trim).filter(|a| !a.is_empty());
        match (self.handler, argument) {
            (Handler::NoArg(handler), None) => handler(controller),
            (Handler::Content(handler), None) => {
                let body = handler(controller);
                async move { body.await.map(Reply::Content) }.boxed()
            }
            (Handler::NoArg(_) | Handler::Content(_), Some(_)) => {
                let name = self.name;
                async move { Err(DispatchError::InvalidInput(format!("{} takes no argument", name))) }.boxed()
            }
            (Handler::OneArg(handler), Some(text)) => match serde_json::from_str::<Value>(text) {
                Ok(value) => handler(controller, value),
                Err(e) => {
                    let message = format!("argument is not valid JSON: {}", e);
                    async move { Err(DispatchError::InvalidInput(message)) }.boxed()
                }
            },
            (Handler::OneArg(_), None) => {
                let name = self.name;
                async move { Err(DispatchError::InvalidInput(format!("{} requires an argument", name))) }.boxed()
            }
        }
    }
}

fn argument<T: DeserializeOwned>(value: Value) -> Result<T, DispatchError> {
    serde_json::from_value(value).map_err(|e| DispatchError::InvalidInput(e.to_string()))
}

fn json<T: Serialize>(value: T) -> Result<Reply, DispatchError> {
    serde_json::to_value(value)
        .map(Reply::Value)
        .map_err(|e| DispatchError::Internal(format!("serialize reply: {}", e)))
}

fn start_recording(c: Arc<Controller>, arg: Value) -> HandlerFuture {
    async move {
        let args: StartRecordingArgs = argument(arg)?;
        c.start_recording(args).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn stop_recording(c: Arc<Controller>) -> HandlerFuture {
    async move {
        c.stop_recording().await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn get_status(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.status().await?) }.boxed()
}

fn get_recording_devices(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.recording_devices().await?) }.boxed()
}

fn get_max_duration(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.max_duration().await?.as_secs_f64()) }.boxed()
}

fn get_devices(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.devices().await?) }.boxed()
}

fn find_device(c: Arc<Controller>, arg: Value) -> HandlerFuture {
    async move {
        let id: String = argument(arg)?;
        json(c.find_device(id).await?)
    }
    .boxed()
}

fn save_as_ndkw(c: Arc<Controller>) -> ContentFuture {
    async move { c.save_as_ndkw().await }.boxed()
}

fn add_to_queue(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.add_to_queue().await?) }.boxed()
}

fn delete_from_queue(c: Arc<Controller>, arg: Value) -> HandlerFuture {
    async move {
        let ids: Vec<Uuid> = argument(arg)?;
        c.delete_from_queue(ids).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn get_queue(c: Arc<Controller>) -> HandlerFuture {
    async move { json(c.queue().await?) }.boxed()
}

fn event(c: Arc<Controller>, kind: EventKind) -> HandlerFuture {
    async move {
        c.next_event(kind).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn event_status_changed(c: Arc<Controller>) -> HandlerFuture {
    event(c, EventKind::StatusChanged)
}

fn event_devices_changed(c: Arc<Controller>) -> HandlerFuture {
    event(c, EventKind::DevicesChanged)
}

fn event_queue_changed(c: Arc<Controller>) -> HandlerFuture {
    event(c, EventKind::QueueChanged)
}

fn wait_until_start(c: Arc<Controller>) -> HandlerFuture {
    async move {
        c.wait_until_recording(true).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}

fn wait_until_stop(c: Arc<Controller>) -> HandlerFuture {
    async move {
        c.wait_until_recording(false).await?;
        Ok(Reply::Empty)
    }
    .boxed()
}
