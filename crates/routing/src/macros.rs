#[macro_export]
macro_rules! field_method {
    ($field_name:ident, $type_name:ty) => {
        #[inline]
        #[must_use]
        pub fn $field_name(&self) -> &$type_name {
            &self.$field_name
        }
    };
}

#[macro_export]
macro_rules! field_method_as_mut {
    ($method_name:ident, $field_name:ident, $type_name:ty) => {
        #[inline]
        pub fn $method_name(&mut self) -> &mut $type_name {
            &mut self.$field_name
        }
    };
}

#[macro_export]
macro_rules! set_field_method_as_mut {
    ($method_name:ident, $field_name:ident, $type_name:ty) => {
        #[inline]
        pub fn $method_name(&mut self, value: $type_name) {
            self.$field_name = value;
        }
    };
}

/// Locks a mutex, recovering the guard when a previous holder panicked.
macro_rules! locked {
    ($mutex:expr) => {
        $mutex
            .lock()
            .unwrap_or_else(::std::sync::PoisonError::into_inner)
    };
}

pub(crate) use locked;
