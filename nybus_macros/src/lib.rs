mod message;

use proc_macro::TokenStream;

use message::Kind;

/// Derive macro implementing `nybus::Payload` and `nybus::Command`.
///
/// The wire descriptor defaults to the defining module path (with `::`
/// rendered as `.`) and the type name. Either part can be overridden:
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Command)]
/// #[message(namespace = "MyApp", name = "PlaceOrder")]
/// pub struct PlaceOrder {
///     pub id: u64,
/// }
/// ```
#[proc_macro_derive(Command, attributes(message))]
pub fn derive_command(input: TokenStream) -> TokenStream {
    message::derive_message(input, Kind::Command)
}

/// Derive macro implementing `nybus::Payload` and `nybus::Event`.
///
/// Accepts the same `#[message(namespace = "...", name = "...")]` override
/// as [`macro@Command`].
#[proc_macro_derive(Event, attributes(message))]
pub fn derive_event(input: TokenStream) -> TokenStream {
    message::derive_message(input, Kind::Event)
}
