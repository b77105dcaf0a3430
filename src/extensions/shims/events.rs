//! `events` module: a pure-JS `EventEmitter` polyfill. No capability check —
//! it never touches the host.

pub const PRELUDE_JS: &str = r#"
(function () {
  class EventEmitter {
    constructor() {
      this._listeners = {};
    }
    on(name, fn) {
      (this._listeners[name] = this._listeners[name] || []).push(fn);
      return this;
    }
    once(name, fn) {
      const wrapper = (...args) => {
        this.off(name, wrapper);
        fn(...args);
      };
      return this.on(name, wrapper);
    }
    off(name, fn) {
      const list = this._listeners[name];
      if (list) this._listeners[name] = list.filter((f) => f !== fn);
      return this;
    }
    removeAllListeners(name) {
      if (name === undefined) this._listeners = {};
      else delete this._listeners[name];
      return this;
    }
    emit(name, ...args) {
      const list = this._listeners[name];
      if (!list || list.length === 0) return false;
      for (const fn of list.slice()) fn(...args);
      return true;
    }
    listenerCount(name) {
      return (this._listeners[name] || []).length;
    }
  }

  globalThis.__moduleRegistry.events = { EventEmitter };
})();
"#;
