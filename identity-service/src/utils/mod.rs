pub mod clock;
pub mod password;
pub mod secret_codec;
pub mod validation;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use password::{PasswordError, PasswordHasher};
pub use secret_codec::{CodecError, SecretCodec};
pub use validation::ValidatedJson;
