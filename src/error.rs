use error_chain::error_chain;

error_chain! {
    types {
        AprError, AprErrorKind, AprResultExt, AprResult;
    }

    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        /// Input was neither a valid IPv4 nor IPv6 literal.
        ///
        /// The rejected literal is supplied.
        BadAddress(literal: String) {
            display("malformed address literal: '{}'", literal)
        }
        /// The resolver reported that the name does not exist.
        ///
        /// Other resolver failures are passed through untouched.
        Nxdomain(name: String) {
            display("name does not exist: '{}'", name)
        }
        /// The anchor catalog could not supply the requested entry.
        AnchorUnavailable(id: u32) {
            display("anchor catalog lookup failed for id {}", id)
        }
        /// A query reached the engine before initialisation finished.
        NotInitialized {
            display("engine not initialised")
        }
    }
}
